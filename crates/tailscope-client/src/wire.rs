//! JSON documents exchanged with the log API.
//!
//! Servers are loose about optional fields, so every field is optional here
//! and normalization happens in one place.

use serde::Deserialize;

use tailscope_types::{Cursor, LogDescriptor, TailMode, TailUpdate};

use crate::ClientError;

/// `GET /logs` answers either a bare list or `{ "logs": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum LogListResponse {
    Wrapped { logs: Vec<LogDescriptor> },
    Bare(Vec<LogDescriptor>),
}

pub fn decode_log_list(body: &str) -> Result<Vec<LogDescriptor>, ClientError> {
    let list = match serde_json::from_str::<LogListResponse>(body)? {
        LogListResponse::Wrapped { logs } => logs,
        LogListResponse::Bare(logs) => logs,
    };
    Ok(list.into_iter().filter(|d| !d.name.is_empty()).collect())
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TailFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    path: Option<String>,
    mode: Option<String>,
    lines: Option<Vec<String>>,
    line: Option<String>,
    cursor: Option<String>,
    exists: Option<bool>,
    size: Option<u64>,
    mtime: Option<f64>,
    ino: Option<u64>,
    error: Option<String>,
    message: Option<String>,
}

impl TailFrame {
    fn into_update(self, fallback_name: &str, mode: TailMode) -> TailUpdate {
        let lines = match (self.lines, self.line) {
            (Some(lines), _) => lines,
            (None, Some(line)) => vec![line],
            (None, None) => Vec::new(),
        };
        TailUpdate {
            name: self
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| fallback_name.to_string()),
            path: self.path.unwrap_or_default(),
            mode,
            lines,
            cursor: self.cursor.filter(|c| !c.is_empty()).map(Cursor::new),
            exists: self.exists.unwrap_or(true),
            size: self.size,
            mtime: self.mtime,
            inode: self.ino,
        }
    }
}

fn parse_mode(mode: &str) -> TailMode {
    if mode.eq_ignore_ascii_case("append") {
        TailMode::Append
    } else {
        TailMode::Full
    }
}

/// Decode a `GET /logs/{name}` body
pub fn decode_tail(body: &str, requested_name: &str) -> Result<TailUpdate, ClientError> {
    let frame: TailFrame = serde_json::from_str(body)?;
    let mode = frame.mode.as_deref().map(parse_mode).unwrap_or_default();
    Ok(frame.into_update(requested_name, mode))
}

/// A message received on the push channel
#[derive(Clone, Debug, PartialEq)]
pub enum PushMessage {
    Tail(TailUpdate),
    /// Fatal for this session: push must not be retried
    Error(String),
}

/// Decode one push channel text frame
pub fn decode_push(text: &str, subscribed_name: &str) -> Result<PushMessage, ClientError> {
    let frame: TailFrame = serde_json::from_str(text)?;
    let kind = frame.kind.as_deref().unwrap_or("").to_ascii_lowercase();

    if kind == "error" {
        let reason = frame
            .error
            .clone()
            .or_else(|| frame.message.clone())
            .unwrap_or_else(|| "server error".to_string());
        return Ok(PushMessage::Error(reason));
    }

    let mode = match frame.mode.as_deref().filter(|m| !m.is_empty()) {
        Some(mode) => parse_mode(mode),
        None if kind == "append" || kind == "line" => TailMode::Append,
        None => TailMode::Full,
    };
    Ok(PushMessage::Tail(frame.into_update(subscribed_name, mode)))
}

/// Extract a readable message from an error body
pub fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tail_full() {
        let body = r#"{"ok":true,"name":"core","path":"/var/log/core.log","lines":["a","b"],
            "cursor":"c1","mode":"full","size":10,"mtime":1700000000.5,"ino":42,"exists":true}"#;
        let update = decode_tail(body, "core").unwrap();
        assert_eq!(update.mode, TailMode::Full);
        assert_eq!(update.lines, vec!["a", "b"]);
        assert_eq!(update.cursor, Some(Cursor::new("c1")));
        assert_eq!(update.inode, Some(42));
        assert!(update.exists);
    }

    #[test]
    fn test_decode_tail_defaults_to_full() {
        let update = decode_tail(r#"{"lines":null,"cursor":""}"#, "core").unwrap();
        assert_eq!(update.mode, TailMode::Full);
        assert!(update.lines.is_empty());
        assert_eq!(update.cursor, None);
        assert_eq!(update.name, "core");
    }

    #[test]
    fn test_decode_push_infers_append_from_type() {
        let msg = decode_push(r#"{"type":"line","line":"hello","cursor":"c9"}"#, "core").unwrap();
        match msg {
            PushMessage::Tail(update) => {
                assert!(update.is_append());
                assert_eq!(update.lines, vec!["hello"]);
                assert_eq!(update.name, "core");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg = decode_push(r#"{"type":"snapshot","lines":["x"]}"#, "core").unwrap();
        assert!(matches!(msg, PushMessage::Tail(ref u) if u.mode == TailMode::Full));
    }

    #[test]
    fn test_decode_push_explicit_mode_wins() {
        let msg = decode_push(r#"{"type":"append","mode":"full","lines":[]}"#, "core").unwrap();
        assert!(matches!(msg, PushMessage::Tail(ref u) if u.mode == TailMode::Full));
    }

    #[test]
    fn test_decode_push_error() {
        let msg = decode_push(r#"{"type":"error","error":"unknown_log"}"#, "core").unwrap();
        assert_eq!(msg, PushMessage::Error("unknown_log".to_string()));
    }

    #[test]
    fn test_decode_log_list_both_shapes() {
        let wrapped = r#"{"ok":true,"logs":[{"name":"core","exists":true,"size":5,"mtime":1.0}]}"#;
        let bare = r#"[{"name":"core","exists":false},{"name":""}]"#;
        assert_eq!(decode_log_list(wrapped).unwrap()[0].size, 5);
        let list = decode_log_list(bare).unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].exists);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"ok":false,"error":"unknown_log"}"#), "unknown_log");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
