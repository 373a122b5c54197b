//! Transport selection for live updates.
//!
//! [`StreamController`] is a pure state machine. It is fed events (view
//! visibility, push channel lifecycle, timers) and answers with the
//! [`StreamCommand`]s the runtime must carry out. Exactly one transport is
//! the authoritative writer at a time, see [`StreamController::writer`].

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use tailscope_types::StreamState;

use crate::backoff::{RetryDecision, RetryPolicy, RetryState};

/// What the remote is known to support for push
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PushSupport {
    /// Not probed (or probe failed); push is tried optimistically
    #[default]
    Unknown,
    Supported,
    Unsupported,
    /// The server sent an error on the channel; never retried this session
    Disabled,
}

impl PushSupport {
    fn allows_push(self) -> bool {
        matches!(self, Self::Unknown | Self::Supported)
    }
}

/// Which path may mutate the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    Push,
    Poll,
}

/// Side effects requested by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCommand {
    StartPolling { interval: Duration },
    StopPolling,
    /// One extra poll shortly after a connect attempt
    QuickPoll { after: Duration },
    /// Open the push channel; events for other generations are stale
    OpenPush { generation: u64 },
    ClosePush,
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    /// `max_attempts` reached; push stays down until a manual reconnect
    Exhausted { attempts: u32 },
}

/// Push/poll state machine for one session
pub struct StreamController {
    policy: RetryPolicy,
    poll_interval: Duration,
    quick_poll_delay: Duration,

    view_active: bool,
    live: bool,
    support: PushSupport,

    generation: u64,
    push_pending: bool,
    push_open: bool,
    polling: bool,
    reconnect_pending: bool,
    exhausted: bool,

    retry: RetryState,
    rng: StdRng,
}

impl StreamController {
    pub fn new(policy: RetryPolicy, poll_interval: Duration, quick_poll_delay: Duration) -> Self {
        Self::with_rng(policy, poll_interval, quick_poll_delay, StdRng::from_entropy())
    }

    /// Controller with a fixed jitter source
    pub fn with_rng(
        policy: RetryPolicy,
        poll_interval: Duration,
        quick_poll_delay: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            policy,
            poll_interval,
            quick_poll_delay,
            view_active: false,
            live: false,
            support: PushSupport::Unknown,
            generation: 0,
            push_pending: false,
            push_open: false,
            polling: false,
            reconnect_pending: false,
            exhausted: false,
            retry: RetryState::default(),
            rng,
        }
    }

    pub fn state(&self) -> StreamState {
        if !self.wants_live() {
            StreamState::Idle
        } else if self.push_open {
            StreamState::LivePush
        } else if self.push_pending {
            StreamState::Connecting
        } else if self.support.allows_push()
            && (self.retry.is_blocked() || self.exhausted)
        {
            StreamState::Disconnected
        } else {
            StreamState::LivePoll
        }
    }

    /// The single path allowed to write to the buffer right now
    pub fn writer(&self) -> Writer {
        if self.push_open { Writer::Push } else { Writer::Poll }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn wants_live(&self) -> bool {
        self.view_active && self.live
    }

    pub fn set_view_active(&mut self, active: bool) -> Vec<StreamCommand> {
        self.view_active = active;
        self.reconcile()
    }

    pub fn set_live(&mut self, live: bool) -> Vec<StreamCommand> {
        self.live = live;
        self.reconcile()
    }

    /// Tear everything down and start over, e.g. after switching logs
    pub fn restart(&mut self) -> Vec<StreamCommand> {
        let mut cmds = self.shutdown();
        cmds.extend(self.reconcile());
        cmds
    }

    /// Result of the capabilities probe; `None` when it failed or was silent
    pub fn on_capabilities(&mut self, websocket: Option<bool>) -> Vec<StreamCommand> {
        match websocket {
            Some(true) if self.support == PushSupport::Unknown => {
                self.support = PushSupport::Supported;
                Vec::new()
            }
            Some(false) if self.support != PushSupport::Disabled => {
                self.support = PushSupport::Unsupported;
                self.downgrade_to_polling()
            }
            _ => Vec::new(),
        }
    }

    /// The push handshake for `generation` completed
    pub fn on_push_opened(&mut self, generation: u64) -> Vec<StreamCommand> {
        if generation != self.generation || !self.push_pending {
            return Vec::new();
        }
        debug!(generation, "push channel open");
        self.push_pending = false;
        self.push_open = true;
        self.retry.reset();

        let mut cmds = Vec::new();
        self.cancel_reconnect(&mut cmds);
        self.stop_polling(&mut cmds);
        cmds
    }

    /// The push channel for `generation` closed or failed to open.
    ///
    /// `permanent` failures (no usable push endpoint) downgrade to polling
    /// for the rest of the session.
    pub fn on_push_closed(&mut self, generation: u64, permanent: bool) -> Vec<StreamCommand> {
        if generation != self.generation || !(self.push_pending || self.push_open) {
            return Vec::new();
        }
        let was_open = self.push_open;
        self.push_pending = false;
        self.push_open = false;
        debug!(generation, was_open, permanent, "push channel closed");

        if permanent {
            self.support = PushSupport::Disabled;
            return self.downgrade_to_polling();
        }
        if !self.wants_live() {
            return Vec::new();
        }

        let mut cmds = Vec::new();
        self.ensure_polling(&mut cmds);
        self.schedule_reconnect(&mut cmds);
        cmds
    }

    /// The server sent an `error` message: push is off for this session
    pub fn on_push_error(&mut self, generation: u64) -> Vec<StreamCommand> {
        if generation != self.generation {
            return Vec::new();
        }
        self.support = PushSupport::Disabled;
        self.downgrade_to_polling()
    }

    /// The backoff timer fired
    pub fn on_reconnect_due(&mut self) -> Vec<StreamCommand> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.retry.fired();

        let mut cmds = Vec::new();
        if self.wants_live() && self.support.allows_push() && !self.retry.is_blocked() {
            self.open_push(&mut cmds);
        }
        cmds
    }

    /// Suppress reconnects until [`StreamController::reconnect`]
    pub fn stop_retry(&mut self) -> Vec<StreamCommand> {
        self.retry.block();
        let mut cmds = Vec::new();
        self.cancel_reconnect(&mut cmds);
        cmds
    }

    /// Manual reconnect: unblock retries and connect now
    pub fn reconnect(&mut self) -> Vec<StreamCommand> {
        self.retry.unblock();
        self.exhausted = false;

        let mut cmds = Vec::new();
        self.cancel_reconnect(&mut cmds);
        if !self.wants_live() {
            return cmds;
        }
        if self.support.allows_push() {
            self.close_push(&mut cmds);
            self.open_push(&mut cmds);
        } else {
            self.ensure_polling(&mut cmds);
        }
        cmds
    }

    /// Stop every transport and timer
    pub fn shutdown(&mut self) -> Vec<StreamCommand> {
        let mut cmds = Vec::new();
        self.close_push(&mut cmds);
        self.cancel_reconnect(&mut cmds);
        self.stop_polling(&mut cmds);
        self.retry.reset();
        self.exhausted = false;
        cmds
    }

    fn reconcile(&mut self) -> Vec<StreamCommand> {
        if !self.wants_live() {
            return self.shutdown();
        }

        let mut cmds = Vec::new();
        let push_idle = !(self.push_pending || self.push_open || self.reconnect_pending);
        let may_push =
            self.support.allows_push() && !self.retry.is_blocked() && !self.exhausted;

        if may_push && push_idle {
            self.open_push(&mut cmds);
        } else if !self.push_open {
            self.ensure_polling(&mut cmds);
        }
        cmds
    }

    fn downgrade_to_polling(&mut self) -> Vec<StreamCommand> {
        let mut cmds = Vec::new();
        self.close_push(&mut cmds);
        self.cancel_reconnect(&mut cmds);
        if self.wants_live() {
            self.ensure_polling(&mut cmds);
        }
        cmds
    }

    /// Open push with polling running as a safety net until it is confirmed
    fn open_push(&mut self, cmds: &mut Vec<StreamCommand>) {
        self.generation += 1;
        self.push_pending = true;
        cmds.push(StreamCommand::OpenPush {
            generation: self.generation,
        });
        self.ensure_polling(cmds);
        cmds.push(StreamCommand::QuickPoll {
            after: self.quick_poll_delay,
        });
    }

    fn close_push(&mut self, cmds: &mut Vec<StreamCommand>) {
        if self.push_pending || self.push_open {
            self.push_pending = false;
            self.push_open = false;
            // invalidate in-flight events from the old channel
            self.generation += 1;
            cmds.push(StreamCommand::ClosePush);
        }
    }

    fn ensure_polling(&mut self, cmds: &mut Vec<StreamCommand>) {
        if !self.polling {
            self.polling = true;
            cmds.push(StreamCommand::StartPolling {
                interval: self.poll_interval,
            });
        }
    }

    fn stop_polling(&mut self, cmds: &mut Vec<StreamCommand>) {
        if self.polling {
            self.polling = false;
            cmds.push(StreamCommand::StopPolling);
        }
    }

    fn cancel_reconnect(&mut self, cmds: &mut Vec<StreamCommand>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.retry.fired();
            cmds.push(StreamCommand::CancelReconnect);
        }
    }

    fn schedule_reconnect(&mut self, cmds: &mut Vec<StreamCommand>) {
        match self
            .retry
            .on_failure(&self.policy, Instant::now(), &mut self.rng)
        {
            RetryDecision::Scheduled { delay, attempt } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling push reconnect");
                self.reconnect_pending = true;
                cmds.push(StreamCommand::ScheduleReconnect { delay, attempt });
            }
            RetryDecision::Blocked => {
                debug!("push reconnect blocked");
            }
            RetryDecision::Exhausted { attempts } => {
                warn!(attempts, "push reconnect attempts exhausted");
                self.exhausted = true;
                cmds.push(StreamCommand::Exhausted { attempts });
            }
        }
    }
}
