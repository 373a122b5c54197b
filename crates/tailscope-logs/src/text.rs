use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::warn;

static OSC: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"\x1b\][^\x07]*(?:\x07|\x1b\\)"));
static CSI: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"\x1b\[[0-?]*[ -/]*[@-~]"));
static CONTROL: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]"));

static ISO_TS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(concat!(
        r"^\s*\[?\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}",
        r"(?:[.,]\d{1,6})?(?:Z|[+-]\d{2}:?\d{2})?\]?\s+",
    ))
});
static SYSLOG_TS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(concat!(
        r"^\s*(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)",
        r"\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+",
    ))
});
static LOOSE_TS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"^\s*\[?(?:\d{4}-\d{2}-\d{2}|\d{2}:\d{2}:\d{2})[^\s\]]{0,32}\]?\s+")
});

/// Build a fixed pattern; a rejected one disables its matcher instead of panicking
pub(crate) fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| warn!(pattern, error = %e, "built-in pattern rejected"))
        .ok()
}

/// Drop trailing `\r`/`\n`
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Remove ANSI escape sequences and C0 control characters (tab and newline survive)
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    let dirty = text
        .bytes()
        .any(|b| (b < 0x20 && b != b'\t' && b != b'\n') || b == 0x7f);
    if !dirty {
        return Cow::Borrowed(text);
    }

    let mut s = text.replace('\r', "");
    for re in [&*OSC, &*CSI, &*CONTROL].into_iter().flatten() {
        s = re.replace_all(&s, "").into_owned();
    }
    Cow::Owned(s)
}

/// The line without a leading ISO-8601, syslog, or timestamp-like prefix
pub fn strip_timestamp(line: &str) -> &str {
    for re in [&*ISO_TS, &*SYSLOG_TS, &*LOOSE_TS].into_iter().flatten() {
        if let Some(m) = re.find(line) {
            return &line[m.end()..];
        }
    }
    line
}

/// Text used for token matching: no line ending, no timestamp, no escapes
pub fn normalize_for_match(raw: &str) -> String {
    let clean = strip_ansi(strip_line_ending(raw));
    strip_timestamp(&clean).to_string()
}

/// What a reader should see (and copy) for a raw line
pub fn format_line_for_copy(raw: &str, show_timestamps: bool) -> String {
    let clean = strip_ansi(strip_line_ending(raw));
    if show_timestamps {
        return clean.into_owned();
    }
    strip_timestamp(&clean).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns_compile() {
        for re in [&OSC, &CSI, &CONTROL, &ISO_TS, &SYSLOG_TS, &LOOSE_TS] {
            assert!(re.is_some());
        }
        assert!(compile(r"(unclosed").is_none());
    }

    #[test]
    fn test_strip_ansi_sequences() {
        let line = "\x1b[31mERROR\x1b[0m disk \x1b]0;title\x07full\r";
        assert_eq!(strip_ansi(line), "ERROR disk full");
        assert!(matches!(strip_ansi("plain\ttext"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_iso_timestamp() {
        let line = "2025-12-28T12:34:56.789Z [info] started";
        assert_eq!(strip_timestamp(line), "[info] started");
        assert_eq!(strip_timestamp("[2025-12-28 12:34:56,123] boot"), "boot");
        assert_eq!(strip_timestamp("2025-12-28 12:34:56+02:00 up"), "up");
    }

    #[test]
    fn test_strip_syslog_timestamp() {
        let line = "Dec 28 12:34:56 router dnsmasq: query";
        assert_eq!(strip_timestamp(line), "router dnsmasq: query");
    }

    #[test]
    fn test_strip_loose_timestamp() {
        assert_eq!(strip_timestamp("12:34:56.001234 tick"), "tick");
    }

    #[test]
    fn test_no_timestamp() {
        assert_eq!(strip_timestamp("no time here"), "no time here");
    }

    #[test]
    fn test_copy_format_hides_timestamp() {
        let raw = "2025-01-01 00:00:00 \x1b[32mready\x1b[0m\n";
        assert_eq!(format_line_for_copy(raw, false), "ready");
        assert_eq!(format_line_for_copy(raw, true), "2025-01-01 00:00:00 ready");
    }
}
