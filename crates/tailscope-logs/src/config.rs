use serde::{Deserialize, Serialize};
use std::time::Duration;

use tailscope_client::window_size;

use crate::backoff::RetryPolicy;
use crate::buffer::MIN_CAPACITY;

/// Poll intervals below this are treated as misconfigured
const MIN_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Lines either side of a line shown by "show context"
pub const CONTEXT_RADIUS: usize = 20;

/// Tunables for one log view session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub buffer_capacity: usize,
    /// Defaults to `buffer_capacity`
    pub pending_capacity: Option<usize>,
    /// Lines requested per full window
    pub window_lines: usize,
    pub poll_interval_ms: u64,
    /// Metadata listing refresh
    pub list_interval_ms: u64,
    pub quick_poll_delay_ms: u64,
    /// At most one resync notice per window
    pub rotation_notice_window_ms: u64,
    pub live: bool,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2000,
            pending_capacity: None,
            window_lines: tailscope_client::DEFAULT_WINDOW,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            list_interval_ms: 5000,
            quick_poll_delay_ms: 900,
            rotation_notice_window_ms: 8000,
            live: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity.max(MIN_CAPACITY)
    }

    pub fn pending_capacity(&self) -> usize {
        self.pending_capacity
            .unwrap_or(self.buffer_capacity())
            .max(MIN_CAPACITY)
    }

    /// Window actually requested from the server
    pub fn window(&self) -> usize {
        window_size(self.window_lines, self.buffer_capacity())
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            DEFAULT_POLL_INTERVAL_MS
        } else {
            self.poll_interval_ms
        };
        Duration::from_millis(ms)
    }

    pub fn list_interval(&self) -> Duration {
        Duration::from_millis(self.list_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn quick_poll_delay(&self) -> Duration {
        Duration::from_millis(self.quick_poll_delay_ms)
    }

    pub fn rotation_notice_window(&self) -> Duration {
        Duration::from_millis(self.rotation_notice_window_ms)
    }
}
