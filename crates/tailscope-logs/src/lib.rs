//! Log engine for tailscope
//!
//! Keeps a bounded, filterable view of a remote log file in sync with the
//! server: level classification, filtering, the ring buffer, pause/resume
//! reconciliation, push/poll transport selection and the session that ties
//! them together.

mod backoff;
mod buffer;
mod classifier;
mod config;
mod error;
mod filter;
mod pending;
mod runtime;
mod session;
mod stream;
mod text;

pub use backoff::{RetryDecision, RetryPolicy, RetryState};
pub use buffer::{LineBuffer, LineContext};
pub use classifier::{ClassifyInput, LevelClassifier, LevelDetector, LevelSupport};
pub use config::SessionConfig;
pub use error::SessionError;
pub use filter::{CompiledFilter, FilterOutput};
pub use pending::{Estimate, PauseReconciler, Resumed, estimate_new_lines};
pub use runtime::{Action, Command, SessionHandle, ViewEvent, spawn_session};
pub use session::{FetchKind, LogListing, LogSession, Notice, ViewDiff, ViewSnapshot, ViewUpdate};
pub use stream::{PushSupport, StreamCommand, StreamController, Writer};
pub use text::format_line_for_copy;

// Re-export types used in our public API
pub use tailscope_types::{FilterConfig, LogLevel, Profile, StreamState};
