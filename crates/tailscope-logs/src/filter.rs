use regex::Regex;

use tailscope_types::{FilterConfig, LogLevel};

use crate::classifier::LevelClassifier;
use crate::text::normalize_for_match;

/// A [`FilterConfig`] prepared for repeated application
#[derive(Clone)]
pub struct CompiledFilter {
    config: FilterConfig,

    /// Minimum level, `None` when level filtering is off or unsupported
    min_level: Option<LogLevel>,

    /// Lower-cased include tokens and presets, all required
    terms: Vec<String>,

    /// Lower-cased presets, required alongside regex patterns
    presets: Vec<String>,

    /// Lower-cased exclude tokens, any one rejects
    exclude: Vec<String>,

    /// Compiled include patterns in regex mode
    patterns: Vec<Regex>,

    /// Why regex mode fell back to substring matching
    regex_error: Option<String>,

    /// Whether any rule can drop a line
    active: bool,
}

impl CompiledFilter {
    pub fn new(config: &FilterConfig, level_supported: bool) -> Self {
        let config = config.normalized();
        let lower = |tokens: &[String]| tokens.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>();

        let effective = config.min_level.max(config.profile.min_level());
        let min_level = (level_supported && effective > LogLevel::Debug).then_some(effective);

        let presets = lower(&config.presets);
        let mut terms = presets.clone();
        terms.extend(lower(&config.include_tokens));

        let (patterns, regex_error) = if config.regex_enabled && !config.include_tokens.is_empty() {
            match compile_patterns(&config.include_tokens) {
                Ok(patterns) => (patterns, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            }
        } else {
            (Vec::new(), None)
        };

        Self {
            active: config.has_content_filters(level_supported),
            exclude: lower(&config.exclude_tokens),
            min_level,
            terms,
            presets,
            patterns,
            regex_error,
            config,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Compile failure message when regex mode could not be honored
    pub fn regex_error(&self) -> Option<&str> {
        self.regex_error.as_deref()
    }

    /// Check one raw line against every rule
    pub fn matches(&self, raw: &str, classifier: &LevelClassifier) -> bool {
        if let Some(min) = self.min_level {
            if !classifier.level(raw).passes_min(min) {
                return false;
            }
        }

        let norm = normalize_for_match(raw);
        let lower = norm.to_lowercase();

        if self.exclude.iter().any(|t| lower.contains(t.as_str())) {
            return false;
        }

        if !self.patterns.is_empty() {
            return self.patterns.iter().all(|re| re.is_match(&norm))
                && self.presets.iter().all(|p| lower.contains(p.as_str()));
        }

        self.terms.iter().all(|t| lower.contains(t.as_str()))
    }

    /// Filter a buffer, keeping an index map back to raw positions
    pub fn apply<'a, I>(&self, lines: I, classifier: &LevelClassifier) -> FilterOutput
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = FilterOutput {
            active: self.active,
            ..Default::default()
        };
        for (idx, line) in lines.into_iter().enumerate() {
            out.total += 1;
            if !self.active || self.matches(line, classifier) {
                out.lines.push(line.to_string());
                out.index_map.push(idx);
            }
        }
        out
    }

    /// `"Lines: N"` or `"Showing F / N · level>=WARNING · include=vpn"`
    pub fn stats(&self, shown: usize, total: usize) -> String {
        let mut parts = Vec::new();
        if self.active {
            parts.push(format!("Showing {} / {}", shown, total));
        } else {
            parts.push(format!("Lines: {}", total));
        }
        if let Some(min) = self.min_level {
            parts.push(format!("level>={}", min.as_str().to_uppercase()));
        }
        if self.config.regex_enabled {
            parts.push("regex".to_string());
        }
        for (label, tokens) in [
            ("presets", &self.config.presets),
            ("include", &self.config.include_tokens),
            ("exclude", &self.config.exclude_tokens),
        ] {
            if !tokens.is_empty() {
                parts.push(format!("{}={}", label, tokens.join(",")));
            }
        }
        parts.join(" · ")
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("config", &self.config)
            .field("min_level", &self.min_level)
            .field("regex_error", &self.regex_error)
            .field("active", &self.active)
            .finish()
    }
}

fn compile_patterns(tokens: &[String]) -> Result<Vec<Regex>, regex::Error> {
    tokens
        .iter()
        .map(|t| Regex::new(&format!("(?i){}", t)))
        .collect()
}

/// Result of one filter pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOutput {
    pub lines: Vec<String>,
    /// `index_map[i]` is the raw buffer position of `lines[i]`
    pub index_map: Vec<usize>,
    /// Raw lines inspected
    pub total: usize,
    /// False when the pass kept everything by construction
    pub active: bool,
}

impl FilterOutput {
    /// Raw buffer position of a filtered line
    pub fn raw_index(&self, filtered_pos: usize) -> Option<usize> {
        self.index_map.get(filtered_pos).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailscope_types::Profile;

    fn run(config: &FilterConfig, supported: bool, lines: &[&str]) -> FilterOutput {
        let classifier = LevelClassifier::default();
        CompiledFilter::new(config, supported).apply(lines.iter().copied(), &classifier)
    }

    #[test]
    fn test_include_tokens_are_anded() {
        let cfg = FilterConfig::default().with_include("vpn error");
        let out = run(
            &cfg,
            false,
            &["VPN tunnel ERROR", "vpn up", "error elsewhere", "wireguard vpn: Error 5"],
        );
        assert_eq!(out.lines, vec!["VPN tunnel ERROR", "wireguard vpn: Error 5"]);
        assert_eq!(out.index_map, vec![0, 3]);
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let cfg = FilterConfig::default().with_include("vpn").with_exclude("debug");
        let out = run(&cfg, false, &["vpn DEBUG handshake", "vpn ready"]);
        assert_eq!(out.lines, vec!["vpn ready"]);
    }

    #[test]
    fn test_matching_ignores_timestamp_and_ansi() {
        let cfg = FilterConfig::default().with_include("2025");
        let out = run(&cfg, false, &["2025-01-01 10:00:00 boot", "build 2025 ok"]);
        assert_eq!(out.index_map, vec![1]);

        let cfg = FilterConfig::default().with_include("red alert");
        let out = run(&cfg, false, &["\x1b[31mred\x1b[0m alert"]);
        assert_eq!(out.lines.len(), 1);
    }

    #[test]
    fn test_level_gating_when_supported() {
        let cfg = FilterConfig::default().with_profile(Profile::Warnings);
        let lines = ["[warn] a", "[info] b", "no level", "[error] c"];

        let out = run(&cfg, true, &lines);
        assert_eq!(out.lines, vec!["[warn] a", "[error] c"]);

        // unsupported logs ignore the level controls entirely
        let out = run(&cfg, false, &lines);
        assert_eq!(out.lines.len(), 4);
        assert!(!out.active);
    }

    #[test]
    fn test_regex_mode_requires_all_patterns_and_presets() {
        let mut cfg = FilterConfig::default().with_include(r"wg\d+ fail").with_preset("vpn");
        cfg.regex_enabled = true;
        let out = run(
            &cfg,
            false,
            &["vpn wg0 failed", "wg1 failed", "vpn wg0 ok", "VPN WG12 FAILURE"],
        );
        assert_eq!(out.index_map, vec![0, 3]);
    }

    #[test]
    fn test_regex_compile_error_falls_back_to_substrings() {
        let mut cfg = FilterConfig::default().with_include("(unclosed");
        cfg.regex_enabled = true;
        let filter = CompiledFilter::new(&cfg, false);
        assert!(filter.regex_error().is_some());

        let out = filter.apply(["x (unclosed y", "other"], &LevelClassifier::default());
        assert_eq!(out.lines, vec!["x (unclosed y"]);
    }

    #[test]
    fn test_inactive_filter_keeps_everything() {
        let out = run(&FilterConfig::default(), true, &["a", "b"]);
        assert_eq!(out.index_map, vec![0, 1]);
        assert_eq!(out.raw_index(1), Some(1));
        assert_eq!(out.raw_index(2), None);
    }

    #[test]
    fn test_stats_line() {
        let filter = CompiledFilter::new(&FilterConfig::default(), false);
        assert_eq!(filter.stats(10, 10), "Lines: 10");

        let mut cfg = FilterConfig::default()
            .with_profile(Profile::Errors)
            .with_include("vpn")
            .with_exclude("debug")
            .with_preset("DNS");
        cfg.regex_enabled = true;
        let filter = CompiledFilter::new(&cfg, true);
        assert_eq!(
            filter.stats(3, 10),
            "Showing 3 / 10 · level>=ERROR · regex · presets=dns · include=vpn · exclude=debug"
        );
    }
}
