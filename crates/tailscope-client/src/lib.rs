//! Tail API client for tailscope
//!
//! This crate talks to the remote log API: one-shot cursor fetches over HTTP,
//! the metadata listing, truncation, and the push channel over WebSocket.

mod error;
mod http;
pub mod wire;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

pub use error::ClientError;
pub use http::{ClientConfig, TailClient};
pub use wire::PushMessage;

// Re-export types used in our public API
pub use tailscope_types::{Cursor, LogDescriptor, TailMode, TailUpdate};

/// Smallest window the client will ask for
pub const MIN_WINDOW: usize = 50;
/// Largest window the server will honor
pub const MAX_WINDOW: usize = 5000;
/// Window used when nothing else is configured
pub const DEFAULT_WINDOW: usize = 400;

/// Clamp a requested window to `[50, min(5000, buffer_capacity)]`
pub fn window_size(requested: usize, buffer_capacity: usize) -> usize {
    let hard_max = MAX_WINDOW.min(buffer_capacity);
    requested.max(MIN_WINDOW).min(hard_max)
}

/// Parameters of one tail subscription or fetch
#[derive(Clone, Debug, PartialEq)]
pub struct TailRequest {
    pub name: String,
    pub window: usize,
    /// `Some` asks for append mode; the server may still answer full
    pub cursor: Option<Cursor>,
}

/// Server feature probe
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// `None` when the server does not say
    pub websocket: Option<bool>,
}

/// Messages arriving on an open push channel
pub type PushStream = BoxStream<'static, Result<PushMessage, ClientError>>;

/// The remote log API as seen by the engine
#[async_trait]
pub trait TailApi: Send + Sync {
    /// `GET /logs`
    async fn list_logs(&self) -> Result<Vec<LogDescriptor>, ClientError>;

    /// `GET /logs/{name}?lines=N[&cursor=C]`
    async fn fetch_tail(&self, request: &TailRequest) -> Result<TailUpdate, ClientError>;

    /// `POST /logs/{name}/truncate`
    async fn truncate(&self, name: &str) -> Result<(), ClientError>;

    async fn capabilities(&self) -> Result<Capabilities, ClientError>;

    /// Resolves once the push handshake completes
    async fn open_push(&self, request: &TailRequest) -> Result<PushStream, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_clamps() {
        assert_eq!(window_size(10, 2000), 50);
        assert_eq!(window_size(400, 2000), 400);
        assert_eq!(window_size(9000, 2000), 2000);
        assert_eq!(window_size(9000, 10_000), 5000);
    }
}
