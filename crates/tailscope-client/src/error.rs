use thiserror::Error;

/// Errors surfaced by the tail API and the push channel
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status: {status} ({message})")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The push channel cannot be constructed at all (not a transient failure)
    #[error("push channel unavailable: {0}")]
    PushUnavailable(String),
}

impl ClientError {
    /// Whether retrying the push channel could ever succeed
    pub fn is_permanent_push_failure(&self) -> bool {
        matches!(self, Self::PushUnavailable(_) | Self::InvalidBaseUrl(_))
    }
}
