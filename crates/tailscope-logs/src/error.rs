use thiserror::Error;

use tailscope_client::ClientError;

/// Errors reported by a log session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The server sent an error on the push channel; polling continues
    #[error("push channel rejected: {0}")]
    PushRejected(String),

    #[error("push reconnect gave up after {attempts} attempts")]
    PushExhausted { attempts: u32 },

    #[error("no log selected")]
    NoSelection,

    #[error("session closed")]
    SessionClosed,
}
