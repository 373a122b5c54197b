use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use tailscope_types::{LevelInfo, LevelSource, LogLevel};

use crate::text::{compile, strip_ansi, strip_line_ending, strip_timestamp};

static SYSLOG_PRI: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"^\s*<(\d{1,3})>"));
static EARLY_BRACKET: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"\[(emerg|alert|crit|error|warn|notice|info|debug)\]")
});
static LEVEL_FIELD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(concat!(
        r#"\b(?:level|severity)"?\s*[:=]\s*"?"#,
        r#"(trace|debug|info|warn|warning|error|fatal|panic)"?\b"#,
    ))
});
static HEAD_BRACKET: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"^\s*[\[(]\s*(trace|debug|info|warn|warning|error|fatal|panic)\s*[\])]")
});
static HEAD_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"^\s*(trace|debug|info|warn|warning|error|fatal|panic)\b\s*[:\- ]")
});
static HEAD_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"\b(trace|debug|info|warn|warning|error|fatal|panic)\b")
});

/// Keyword fallbacks, checked in order
static KEYWORDS: LazyLock<Vec<(Regex, LogLevel, f32)>> = LazyLock::new(|| {
    [
        (r"\b(?:fatal|panic)\b", LogLevel::Error, 0.35),
        (
            r"\b(?:error|err|failed|failure|exception|traceback)\b",
            LogLevel::Error,
            0.3,
        ),
        (r"\b(?:warn|warning|deprecated)\b", LogLevel::Warning, 0.3),
        (r"\b(?:info|started|listening|connected)\b", LogLevel::Info, 0.25),
        (r"\b(?:debug|trace)\b", LogLevel::Debug, 0.25),
    ]
    .into_iter()
    .filter_map(|(pattern, level, confidence)| {
        compile(pattern).map(|re| (re, level, confidence))
    })
    .collect()
});

fn captures<'h>(re: &LazyLock<Option<Regex>>, haystack: &'h str) -> Option<Captures<'h>> {
    re.as_ref()?.captures(haystack)
}

/// Bracketed tokens further in than this are not treated as the level
const EARLY_BRACKET_LIMIT: usize = 60;
/// Length of the line head inspected after the timestamp
const HEAD_LEN: usize = 80;
/// Loose head tokens must start before this offset
const HEAD_TOKEN_LIMIT: usize = 30;

/// Confidence at or above which a classification counts as structured
pub const STRONG_CONFIDENCE: f32 = 0.85;
/// Lines inspected by [`LevelSupport::evaluate`]
pub const SUPPORT_SAMPLE: usize = 250;

/// One raw line prepared for the detectors
pub struct ClassifyInput<'a> {
    /// Lower-cased, escape-free line, timestamp included
    pub lower: &'a str,
    /// Lower-cased head of the line after its timestamp
    pub head: &'a str,
}

/// One heuristic in the classification chain
pub trait LevelDetector: Send + Sync {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo>;
}

/// `<N>` syslog priority prefix
pub struct SyslogPriority;

impl LevelDetector for SyslogPriority {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo> {
        let caps = captures(&SYSLOG_PRI, input.lower)?;
        let pri: u32 = caps[1].parse::<u32>().unwrap_or(0).min(191);
        let level = match pri % 8 {
            0..=3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        };
        Some(LevelInfo::new(level, 1.0, LevelSource::SyslogPri))
    }
}

/// `[error]` style tokens close to the line start (nginx, dnsmasq)
pub struct EarlyBracket;

impl LevelDetector for EarlyBracket {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo> {
        let caps = captures(&EARLY_BRACKET, input.lower)?;
        let whole = caps.get(0)?;
        if whole.start() >= EARLY_BRACKET_LIMIT {
            return None;
        }
        Some(LevelInfo::new(
            LogLevel::from_token(&caps[1]),
            1.0,
            LevelSource::EarlyBracket,
        ))
    }
}

/// `level=info`, `"level":"warn"`, `severity=ERROR`
pub struct StructuredField;

impl LevelDetector for StructuredField {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo> {
        let caps = captures(&LEVEL_FIELD, input.lower)?;
        Some(LevelInfo::new(
            LogLevel::from_token(&caps[1]),
            1.0,
            LevelSource::Field,
        ))
    }
}

/// `[INFO] ...`, `WARN: ...` or a level word near the start, after the timestamp
pub struct HeadToken;

impl LevelDetector for HeadToken {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo> {
        if let Some(caps) = captures(&HEAD_BRACKET, input.head) {
            return Some(LevelInfo::new(
                LogLevel::from_token(&caps[1]),
                0.9,
                LevelSource::HeadBracket,
            ));
        }
        if let Some(caps) = captures(&HEAD_PREFIX, input.head) {
            return Some(LevelInfo::new(
                LogLevel::from_token(&caps[1]),
                0.9,
                LevelSource::HeadPrefix,
            ));
        }
        let caps = captures(&HEAD_TOKEN, input.head)?;
        if caps.get(1)?.start() >= HEAD_TOKEN_LIMIT {
            return None;
        }
        Some(LevelInfo::new(
            LogLevel::from_token(&caps[1]),
            0.7,
            LevelSource::HeadToken,
        ))
    }
}

/// Severity words anywhere in the line
pub struct KeywordFallback;

impl LevelDetector for KeywordFallback {
    fn detect(&self, input: &ClassifyInput<'_>) -> Option<LevelInfo> {
        KEYWORDS
            .iter()
            .find(|(re, _, _)| re.is_match(input.lower))
            .map(|(_, level, confidence)| {
                LevelInfo::new(*level, *confidence, LevelSource::Keyword)
            })
    }
}

/// Ordered chain of level detectors; the first match wins
pub struct LevelClassifier {
    detectors: Vec<Box<dyn LevelDetector>>,
}

impl Default for LevelClassifier {
    fn default() -> Self {
        Self::empty()
            .with_detector(SyslogPriority)
            .with_detector(EarlyBracket)
            .with_detector(StructuredField)
            .with_detector(HeadToken)
            .with_detector(KeywordFallback)
    }
}

impl LevelClassifier {
    /// A classifier with no detectors; every line is `Unknown`
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Append a detector at the lowest priority
    pub fn with_detector(mut self, detector: impl LevelDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    /// Insert a detector ahead of all others
    pub fn with_leading_detector(mut self, detector: impl LevelDetector + 'static) -> Self {
        self.detectors.insert(0, Box::new(detector));
        self
    }

    pub fn classify(&self, raw: &str) -> LevelInfo {
        let clean = strip_ansi(strip_line_ending(raw));
        let lower = clean.to_lowercase();
        let rest = strip_timestamp(&clean).trim();
        let head = rest.chars().take(HEAD_LEN).collect::<String>().to_lowercase();

        let input = ClassifyInput {
            lower: &lower,
            head: &head,
        };
        self.detectors
            .iter()
            .find_map(|d| d.detect(&input))
            .unwrap_or(LevelInfo::UNKNOWN)
    }

    pub fn level(&self, raw: &str) -> LogLevel {
        self.classify(raw).level
    }
}

/// Whether a window of lines carries enough structure to offer level filtering
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelSupport {
    pub supported: bool,
    /// Non-blank lines sampled
    pub total: usize,
    /// Lines classified with [`STRONG_CONFIDENCE`] or better
    pub strong: usize,
    pub ratio: f32,
    pub levels: BTreeSet<LogLevel>,
}

impl LevelSupport {
    /// Sample the last [`SUPPORT_SAMPLE`] non-blank lines of `lines`
    pub fn evaluate<'a, I>(classifier: &LevelClassifier, lines: I) -> Self
    where
        I: DoubleEndedIterator<Item = &'a str>,
    {
        let mut support = Self::default();
        for line in lines.rev().filter(|l| !l.trim().is_empty()).take(SUPPORT_SAMPLE) {
            support.total += 1;
            let info = classifier.classify(line);
            if info.level != LogLevel::Unknown && info.confidence >= STRONG_CONFIDENCE {
                support.strong += 1;
                support.levels.insert(info.level);
            }
        }

        support.ratio = if support.total == 0 {
            0.0
        } else {
            support.strong as f32 / support.total as f32
        };
        support.supported = (support.total >= 25
            && support.strong >= 6
            && support.ratio >= 0.12
            && !support.levels.is_empty())
            || (support.strong >= 18 && support.total >= 20);
        support
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> LevelInfo {
        LevelClassifier::default().classify(line)
    }

    #[test]
    fn test_builtin_patterns_compile() {
        for re in [
            &SYSLOG_PRI,
            &EARLY_BRACKET,
            &LEVEL_FIELD,
            &HEAD_BRACKET,
            &HEAD_PREFIX,
            &HEAD_TOKEN,
        ] {
            assert!(re.is_some());
        }
        assert_eq!(KEYWORDS.len(), 5);
    }

    #[test]
    fn test_syslog_priority() {
        let info = classify("<34>Dec 28 12:34:56 router sshd: auth failure");
        assert_eq!(info.level, LogLevel::Error);
        assert_eq!(info.source, LevelSource::SyslogPri);
        assert_eq!(classify("<12>msg").level, LogLevel::Warning);
        assert_eq!(classify("<13>msg").level, LogLevel::Info);
        assert_eq!(classify("<15>msg").level, LogLevel::Debug);
        // clamped to 191, 191 % 8 == 7
        assert_eq!(classify("<999>msg").level, LogLevel::Debug);
    }

    #[test]
    fn test_early_bracket() {
        let info = classify("2025/12/28 12:34:56 [crit] 1234#0: upstream gone");
        assert_eq!(info.level, LogLevel::Error);
        assert_eq!(info.confidence, 1.0);
        assert_eq!(info.source, LevelSource::EarlyBracket);

        let far = format!("{} [error] late", "x".repeat(70));
        assert_ne!(classify(&far).source, LevelSource::EarlyBracket);
    }

    #[test]
    fn test_structured_field() {
        let info = classify(r#"{"time":"x","level":"warn","msg":"slow"}"#);
        assert_eq!(info.level, LogLevel::Warning);
        assert_eq!(info.source, LevelSource::Field);
        assert_eq!(classify("ts=1 severity=ERROR msg=x").level, LogLevel::Error);
    }

    #[test]
    fn test_head_tokens_after_timestamp() {
        let info = classify("2025-12-28T12:34:56Z [WARNING] disk almost full");
        assert_eq!(info.level, LogLevel::Warning);
        assert_eq!(info.source, LevelSource::HeadBracket);
        assert!((info.confidence - 0.9).abs() < f32::EPSILON);

        let info = classify("Dec 28 12:34:56 ERROR: boom");
        assert_eq!(info.source, LevelSource::HeadPrefix);
        assert_eq!(info.level, LogLevel::Error);

        let info = classify("xray core: info routing updated");
        assert_eq!(info.source, LevelSource::HeadToken);
        assert!((info.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keyword_fallback() {
        let tail = "x".repeat(40);
        let info = classify(&format!("{} connection failed", tail));
        assert_eq!(info.level, LogLevel::Error);
        assert_eq!(info.source, LevelSource::Keyword);

        assert_eq!(classify(&format!("{} is deprecated", tail)).level, LogLevel::Warning);
        assert_eq!(classify(&format!("{} listening on :80", tail)).level, LogLevel::Info);
        assert_eq!(classify("nothing to see"), LevelInfo::UNKNOWN);
    }

    #[test]
    fn test_ansi_does_not_hide_level() {
        let info = classify("\x1b[31m[error]\x1b[0m bad");
        assert_eq!(info.level, LogLevel::Error);
    }

    #[test]
    fn test_custom_detector_runs_first() {
        struct AlwaysDebug;
        impl LevelDetector for AlwaysDebug {
            fn detect(&self, _: &ClassifyInput<'_>) -> Option<LevelInfo> {
                Some(LevelInfo::new(LogLevel::Debug, 1.0, LevelSource::None))
            }
        }

        let classifier = LevelClassifier::default().with_leading_detector(AlwaysDebug);
        assert_eq!(classifier.level("[error] x"), LogLevel::Debug);
        assert_eq!(LevelClassifier::empty().level("[error] x"), LogLevel::Unknown);
    }

    #[test]
    fn test_level_support_thresholds() {
        let classifier = LevelClassifier::default();

        let mut lines: Vec<String> = (0..22).map(|i| format!("plain line {}", i)).collect();
        lines.extend((0..6).map(|i| format!("[info] structured {}", i)));
        let support = LevelSupport::evaluate(&classifier, lines.iter().map(String::as_str));
        assert_eq!(support.total, 28);
        assert_eq!(support.strong, 6);
        assert!(support.supported);

        let few: Vec<String> = (0..10).map(|i| format!("[error] {}", i)).collect();
        let support = LevelSupport::evaluate(&classifier, few.iter().map(String::as_str));
        assert!(!support.supported);

        let unstructured: Vec<String> = (0..100).map(|i| format!("hello {}", i)).collect();
        let support = LevelSupport::evaluate(&classifier, unstructured.iter().map(String::as_str));
        assert!(!support.supported);
        assert_eq!(support.ratio, 0.0);
    }

    #[test]
    fn test_level_support_ignores_blank_lines() {
        let classifier = LevelClassifier::default();
        let mut lines: Vec<&str> = vec!["level=info ok"; 20];
        lines.extend(vec!["   "; 300]);
        let support = LevelSupport::evaluate(&classifier, lines.into_iter());
        assert_eq!(support.total, 20);
        assert!(support.supported);
    }
}
