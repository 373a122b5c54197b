//! Shared types for tailscope
//!
//! This crate contains the data model shared by the tail client, the log
//! engine and the presentation layer.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Remote Log Types
// ============================================================================

/// A server-side log file and its last-known physical state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDescriptor {
    pub name: String,
    pub path: Option<String>,
    pub exists: bool,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: f64,
    #[serde(alias = "ino")]
    pub inode: u64,
}

impl LogDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: true,
            ..Default::default()
        }
    }

    /// True when the file grew or was touched since `prev` was taken
    pub fn grew_since(&self, prev: &LogDescriptor) -> bool {
        if !self.exists || !prev.exists {
            return false;
        }
        self.size > prev.size || self.mtime > prev.mtime + 0.001
    }

    /// True when the file was replaced (inode changed) or truncated (size shrank)
    pub fn rotated_from(&self, prev: &LogDescriptor) -> bool {
        if !self.exists || !prev.exists {
            return false;
        }
        let inode_changed = self.inode != 0 && prev.inode != 0 && self.inode != prev.inode;
        inode_changed || self.size < prev.size
    }

    /// Time elapsed since the last modification
    pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        if !self.exists || self.mtime <= 0.0 {
            return None;
        }
        let millis = (self.mtime * 1000.0) as i64;
        let modified = DateTime::<Utc>::from_timestamp_millis(millis)?;
        Some((now - modified).max(TimeDelta::zero()))
    }
}

/// Compact age label: "12s", "5m", "3h", "2d"
pub fn format_age(age: TimeDelta) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Opaque server read position
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the server answered a tail request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailMode {
    /// The whole window; replaces whatever the client holds
    #[default]
    Full,
    /// Lines written after the presented cursor
    Append,
}

impl TailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Append => "append",
        }
    }
}

/// One tail window delivered by either transport
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TailUpdate {
    pub name: String,
    pub path: String,
    pub mode: TailMode,
    pub lines: Vec<String>,
    pub cursor: Option<Cursor>,
    pub exists: bool,
    pub size: Option<u64>,
    pub mtime: Option<f64>,
    pub inode: Option<u64>,
}

impl TailUpdate {
    pub fn full(name: impl Into<String>, lines: Vec<String>, cursor: Option<Cursor>) -> Self {
        Self {
            name: name.into(),
            mode: TailMode::Full,
            lines,
            cursor,
            exists: true,
            ..Default::default()
        }
    }

    pub fn append(name: impl Into<String>, lines: Vec<String>, cursor: Option<Cursor>) -> Self {
        Self {
            mode: TailMode::Append,
            ..Self::full(name, lines, cursor)
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            exists: false,
            ..Self::full(name, Vec::new(), None)
        }
    }

    pub fn is_append(&self) -> bool {
        self.mode == TailMode::Append
    }

    /// Descriptor view of the metadata carried by this update, if complete
    pub fn descriptor(&self) -> Option<LogDescriptor> {
        let (size, mtime) = (self.size?, self.mtime?);
        Some(LogDescriptor {
            name: self.name.clone(),
            path: (!self.path.is_empty()).then(|| self.path.clone()),
            exists: self.exists,
            size,
            mtime,
            inode: self.inode.unwrap_or(0),
        })
    }
}

// ============================================================================
// Level Types
// ============================================================================

/// Canonical log severity, ordered from least to most severe
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Unknown,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Canonicalize a level token and its common synonyms
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Self::Debug,
            "info" | "notice" => Self::Info,
            "warn" | "warning" => Self::Warning,
            "err" | "error" | "fatal" | "panic" | "crit" | "alert" | "emerg" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Whether a line at this level survives a `min` threshold.
    ///
    /// A threshold of `debug` (or lower) means "all lines", including
    /// unclassified ones. Anything stricter rejects `Unknown`.
    pub fn passes_min(self, min: LogLevel) -> bool {
        if min <= LogLevel::Debug {
            return true;
        }
        if self == LogLevel::Unknown {
            return false;
        }
        self >= min
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_token(s) {
            Self::Unknown => Err(format!("unknown log level: {}", s)),
            level => Ok(level),
        }
    }
}

/// Which heuristic produced a classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LevelSource {
    SyslogPri,
    EarlyBracket,
    Field,
    HeadBracket,
    HeadPrefix,
    HeadToken,
    Keyword,
    None,
}

/// Result of classifying one raw line
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelInfo {
    pub level: LogLevel,
    /// In `[0, 1]`
    pub confidence: f32,
    pub source: LevelSource,
}

impl LevelInfo {
    pub const UNKNOWN: LevelInfo = LevelInfo {
        level: LogLevel::Unknown,
        confidence: 0.0,
        source: LevelSource::None,
    };

    pub fn new(level: LogLevel, confidence: f32, source: LevelSource) -> Self {
        Self {
            level,
            confidence,
            source,
        }
    }
}

// ============================================================================
// Filter Types
// ============================================================================

/// Quick level presets offered next to the level selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    All,
    Info,
    Warnings,
    Errors,
}

impl Profile {
    pub fn min_level(&self) -> LogLevel {
        match self {
            Self::All => LogLevel::Debug,
            Self::Info => LogLevel::Info,
            Self::Warnings => LogLevel::Warning,
            Self::Errors => LogLevel::Error,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Info => "info",
            Self::Warnings => "warnings",
            Self::Errors => "errors",
        }
    }
}

/// Topic presets matched as plain substrings
pub const PRESET_KEYS: [&str; 6] = ["auth", "dhcp", "wireless", "vpn", "dns", "kernel"];

/// Everything the filter engine needs for one pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_level: LogLevel,
    pub profile: Profile,
    pub include_tokens: Vec<String>,
    pub exclude_tokens: Vec<String>,
    pub regex_enabled: bool,
    pub presets: Vec<String>,
    pub show_timestamps: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            profile: Profile::All,
            include_tokens: Vec::new(),
            exclude_tokens: Vec::new(),
            regex_enabled: false,
            presets: Vec::new(),
            show_timestamps: true,
        }
    }
}

impl FilterConfig {
    /// Select a profile; keeps `min_level` in step with it
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self.min_level = profile.min_level();
        self
    }

    pub fn with_include(mut self, raw: &str) -> Self {
        self.include_tokens.extend(split_tokens(raw));
        self.include_tokens = normalize_tokens(&self.include_tokens);
        self
    }

    pub fn with_exclude(mut self, raw: &str) -> Self {
        self.exclude_tokens.extend(split_tokens(raw));
        self.exclude_tokens = normalize_tokens(&self.exclude_tokens);
        self
    }

    pub fn with_preset(mut self, key: &str) -> Self {
        self.presets.push(key.to_string());
        self.presets = normalize_presets(&self.presets);
        self
    }

    /// Trimmed, de-duplicated copy of this config
    pub fn normalized(&self) -> Self {
        Self {
            include_tokens: normalize_tokens(&self.include_tokens),
            exclude_tokens: normalize_tokens(&self.exclude_tokens),
            presets: normalize_presets(&self.presets),
            ..self.clone()
        }
    }

    /// Reset the level controls to "show everything"
    pub fn reset_level(&mut self) {
        self.min_level = LogLevel::Debug;
        self.profile = Profile::All;
    }

    /// Whether any filter would drop lines.
    ///
    /// Level and profile only count when the log supports level parsing.
    pub fn has_content_filters(&self, level_supported: bool) -> bool {
        if level_supported && (self.min_level > LogLevel::Debug || self.profile != Profile::All) {
            return true;
        }
        !self.include_tokens.is_empty()
            || !self.exclude_tokens.is_empty()
            || !self.presets.is_empty()
    }
}

/// Split free-form token input on whitespace and commas
pub fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Trim and de-duplicate case-insensitively, keeping the first spelling
pub fn normalize_tokens(tokens: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(String::from)
        .collect()
}

fn normalize_presets(presets: &[String]) -> Vec<String> {
    let lowered: Vec<String> = presets.iter().map(|p| p.trim().to_lowercase()).collect();
    normalize_tokens(&lowered)
}

// ============================================================================
// Stream Types
// ============================================================================

/// Which transport currently owns live updates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    /// Push handshake pending; the safety-net poll is the writer
    Connecting,
    LivePush,
    LivePoll,
    /// Retries exhausted or blocked
    Disconnected,
}

impl StreamState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::LivePush => "live (push)",
            Self::LivePoll => "live (poll)",
            Self::Disconnected => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_synonyms() {
        assert_eq!(LogLevel::from_token("WARN"), LogLevel::Warning);
        assert_eq!(LogLevel::from_token("crit"), LogLevel::Error);
        assert_eq!(LogLevel::from_token("emerg"), LogLevel::Error);
        assert_eq!(LogLevel::from_token("notice"), LogLevel::Info);
        assert_eq!(LogLevel::from_token("trace"), LogLevel::Debug);
        assert_eq!(LogLevel::from_token("verbose"), LogLevel::Unknown);
    }

    #[test]
    fn test_unknown_fails_strict_min() {
        assert!(LogLevel::Unknown.passes_min(LogLevel::Debug));
        assert!(!LogLevel::Unknown.passes_min(LogLevel::Info));
        assert!(LogLevel::Error.passes_min(LogLevel::Warning));
        assert!(!LogLevel::Info.passes_min(LogLevel::Warning));
    }

    #[test]
    fn test_normalize_tokens_dedupes_case_insensitively() {
        let tokens = vec![
            " VPN ".to_string(),
            "vpn".to_string(),
            "".to_string(),
            "dns".to_string(),
        ];
        assert_eq!(normalize_tokens(&tokens), vec!["VPN", "dns"]);
        assert_eq!(split_tokens("a, b  c,,"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_has_content_filters_ignores_level_when_unsupported() {
        let cfg = FilterConfig::default().with_profile(Profile::Errors);
        assert!(!cfg.has_content_filters(false));
        assert!(cfg.has_content_filters(true));
        assert!(FilterConfig::default().with_exclude("debug").has_content_filters(false));
    }

    #[test]
    fn test_descriptor_growth_and_rotation() {
        let prev = LogDescriptor {
            size: 100,
            mtime: 10.0,
            inode: 7,
            ..LogDescriptor::new("core")
        };
        let grown = LogDescriptor {
            size: 120,
            ..prev.clone()
        };
        assert!(grown.grew_since(&prev));
        assert!(!grown.rotated_from(&prev));

        let rotated = LogDescriptor {
            inode: 8,
            size: 5,
            ..prev.clone()
        };
        assert!(rotated.rotated_from(&prev));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(TimeDelta::seconds(12)), "12s");
        assert_eq!(format_age(TimeDelta::seconds(300)), "5m");
        assert_eq!(format_age(TimeDelta::hours(3)), "3h");
        assert_eq!(format_age(TimeDelta::days(2)), "2d");
    }
}
