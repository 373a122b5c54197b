//! Async driver for a [`LogSession`].
//!
//! One task owns the session and the [`StreamController`]. Everything else
//! (fetches, the push channel, timers, the metadata listing) runs in
//! short-lived tasks that report back over an internal channel, so session
//! state is only ever touched from the driver loop.

use futures::StreamExt;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailscope_client::{ClientError, PushMessage, TailApi, TailRequest};
use tailscope_types::{FilterConfig, LogDescriptor, StreamState, TailUpdate};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{FetchKind, LogSession, Notice, ViewDiff, ViewSnapshot, ViewUpdate};
use crate::stream::{StreamCommand, StreamController, Writer};

/// Requests accepted by a running session
#[derive(Clone, Debug)]
pub enum Command {
    SelectLog(String),
    Pause,
    Resume,
    /// Leave pause mode dropping what was missed
    ExitPause,
    SetFilter(FilterConfig),
    /// Reload the full window
    Refresh,
    SetLive(bool),
    /// The view was shown or hidden
    SetViewActive(bool),
    StopRetry,
    Reconnect,
    /// Empty the selected log on the server
    Truncate,
    Shutdown,
}

/// The user-facing operation an error belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Refresh,
    Truncate,
    List,
    Push,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Refresh => "refresh",
            Self::Truncate => "truncate",
            Self::List => "list logs",
            Self::Push => "live push",
        };
        f.write_str(s)
    }
}

/// What the presentation layer is told
#[derive(Debug)]
pub enum ViewEvent {
    Updated(ViewDiff),
    Notice(Notice),
    Failed { action: Action, error: SessionError },
    StreamChanged(StreamState),
    LogsChanged,
}

/// Results reported back to the driver by its helper tasks
enum Internal {
    FetchDone {
        seq: u64,
        request: TailRequest,
        kind: FetchKind,
        result: Result<TailUpdate, ClientError>,
    },
    PollTick,
    ReconnectDue,
    Listed(Result<Vec<LogDescriptor>, ClientError>),
    Capabilities(Option<bool>),
    PushOpened { generation: u64 },
    Push {
        generation: u64,
        message: PushMessage,
    },
    PushClosed { generation: u64, permanent: bool },
    Truncated {
        name: String,
        result: Result<(), ClientError>,
    },
}

/// Handle to a running session
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<Arc<ViewSnapshot>>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::SessionClosed)
    }

    pub fn select_log(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::SelectLog(name.into()))
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.send(Command::Resume)
    }

    pub fn set_filter(&self, filter: FilterConfig) -> Result<(), SessionError> {
        self.send(Command::SetFilter(filter))
    }

    pub fn refresh(&self) -> Result<(), SessionError> {
        self.send(Command::Refresh)
    }

    pub fn truncate(&self) -> Result<(), SessionError> {
        self.send(Command::Truncate)
    }

    /// Latest published state of the session
    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Stop the session and wait for its tasks to wind down
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Start a session on the current runtime.
///
/// When `initial` is `None` the first existing log of the first listing is
/// selected.
pub fn spawn_session(
    api: Arc<dyn TailApi>,
    config: SessionConfig,
    filter: FilterConfig,
    initial: Option<String>,
) -> (SessionHandle, mpsc::UnboundedReceiver<ViewEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let stream = StreamController::new(
        config.retry.clone(),
        config.poll_interval(),
        config.quick_poll_delay(),
    );
    let live = config.live;
    let session = LogSession::new(config, filter);
    let snapshot = Arc::new(RwLock::new(Arc::new(session.snapshot())));

    let driver = Driver {
        api,
        session,
        stream,
        view_active: true,
        live,
        events: event_tx,
        outbox: Vec::new(),
        internal: internal_tx,
        snapshot: Arc::clone(&snapshot),
        cancel: CancellationToken::new(),
        tasks: Tasks::default(),
        fetch_seq: 0,
        truncating: false,
        list_failing: false,
        last_state: StreamState::Idle,
    };
    let task = tokio::spawn(driver.run(command_rx, internal_rx, initial));

    (
        SessionHandle {
            commands: command_tx,
            snapshot,
            task,
        },
        event_rx,
    )
}

#[derive(Default)]
struct Tasks {
    fetch: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
    quick_poll: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    push: Option<JoinHandle<()>>,
    list: Option<JoinHandle<()>>,
    other: Vec<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        let slots = [
            self.fetch.take(),
            self.poll.take(),
            self.quick_poll.take(),
            self.reconnect.take(),
            self.push.take(),
            self.list.take(),
        ];
        for task in slots.into_iter().flatten().chain(self.other.drain(..)) {
            task.abort();
        }
    }
}

fn abort(slot: &mut Option<JoinHandle<()>>) {
    if let Some(task) = slot.take() {
        task.abort();
    }
}

struct Driver {
    api: Arc<dyn TailApi>,
    session: LogSession,
    stream: StreamController,
    view_active: bool,
    live: bool,

    events: mpsc::UnboundedSender<ViewEvent>,
    outbox: Vec<ViewEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    snapshot: Arc<RwLock<Arc<ViewSnapshot>>>,

    cancel: CancellationToken,
    tasks: Tasks,
    /// Identifies the fetch whose result is still wanted
    fetch_seq: u64,
    truncating: bool,
    list_failing: bool,
    last_state: StreamState,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        initial: Option<String>,
    ) {
        self.spawn_listing();
        self.spawn_capabilities();
        let cmds = self.stream.set_live(self.live);
        self.apply_stream(cmds);
        if let Some(name) = initial {
            self.select(name);
        }
        self.publish();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },

                Some(event) = internal.recv() => self.on_internal(event),
            }
            self.publish();
        }

        debug!("session stopped");
        self.cancel.cancel();
        self.tasks.abort_all();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SelectLog(name) => self.select(name),
            Command::Pause => self.session.pause(),
            Command::Resume => {
                let update = self.session.resume();
                self.emit_update(update);
            }
            Command::ExitPause => self.session.exit_pause(),
            Command::SetFilter(filter) => {
                let update = self.session.set_filter(filter);
                self.emit_update(update);
            }
            Command::Refresh => self.manual_fetch(),
            Command::SetLive(live) => {
                self.live = live;
                let cmds = self.stream.set_live(live);
                self.apply_stream(cmds);
            }
            Command::SetViewActive(active) => {
                self.view_active = active;
                if active && self.tasks.list.is_none() {
                    self.spawn_listing();
                } else if !active {
                    abort(&mut self.tasks.list);
                }
                self.sync_view_active();
            }
            Command::StopRetry => {
                let cmds = self.stream.stop_retry();
                self.apply_stream(cmds);
            }
            Command::Reconnect => {
                let cmds = self.stream.reconnect();
                self.apply_stream(cmds);
            }
            Command::Truncate => self.truncate(),
            Command::Shutdown => self.cancel.cancel(),
        }
    }

    fn select(&mut self, name: String) {
        let update = self.session.select_log(&name);
        if update.diff == ViewDiff::Unchanged {
            return;
        }
        info!(name = %name, "log selected");
        self.emit_update(update);
        self.sync_view_active();
        self.manual_fetch();
    }

    fn sync_view_active(&mut self) {
        let active = self.view_active && self.session.selected().is_some();
        let cmds = self.stream.set_view_active(active);
        self.apply_stream(cmds);
    }

    /// Full reload: transports stop until the fresh window is in
    fn manual_fetch(&mut self) {
        self.cancel_fetch();
        let cmds = self.stream.shutdown();
        self.apply_stream(cmds);
        if !self.spawn_fetch(FetchKind::Manual) {
            self.restart_stream();
        }
    }

    fn restart_stream(&mut self) {
        let cmds = self.stream.restart();
        self.apply_stream(cmds);
    }

    fn truncate(&mut self) {
        if self.truncating {
            return;
        }
        let Some(name) = self.session.selected().map(String::from) else {
            self.emit(ViewEvent::Failed {
                action: Action::Truncate,
                error: SessionError::NoSelection,
            });
            return;
        };
        self.truncating = true;
        self.cancel_fetch();
        let cmds = self.stream.shutdown();
        self.apply_stream(cmds);

        let api = Arc::clone(&self.api);
        let tx = self.internal.clone();
        self.tasks.other.retain(|t| !t.is_finished());
        self.tasks.other.push(tokio::spawn(async move {
            let result = api.truncate(&name).await;
            let _ = tx.send(Internal::Truncated { name, result });
        }));
    }

    // ========================================================================
    // Internal events
    // ========================================================================

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::FetchDone {
                seq,
                request,
                kind,
                result,
            } => self.on_fetch_done(seq, request, kind, result),

            Internal::PollTick => {
                if !self.truncating
                    && self.stream.wants_live()
                    && self.stream.writer() == Writer::Poll
                {
                    self.spawn_fetch(FetchKind::Auto);
                }
            }

            Internal::ReconnectDue => {
                self.tasks.reconnect = None;
                let cmds = self.stream.on_reconnect_due();
                self.apply_stream(cmds);
            }

            Internal::Listed(Ok(list)) => {
                self.list_failing = false;
                if let Some(name) = self.session.on_descriptors(list) {
                    self.select(name);
                }
                self.emit(ViewEvent::LogsChanged);
            }
            Internal::Listed(Err(e)) => {
                warn!(error = %e, "listing logs failed");
                // reported once per outage
                if !std::mem::replace(&mut self.list_failing, true) {
                    self.emit(ViewEvent::Failed {
                        action: Action::List,
                        error: e.into(),
                    });
                }
            }

            Internal::Capabilities(websocket) => {
                debug!(?websocket, "capabilities probed");
                let cmds = self.stream.on_capabilities(websocket);
                self.apply_stream(cmds);
            }

            Internal::PushOpened { generation } => {
                let cmds = self.stream.on_push_opened(generation);
                self.apply_stream(cmds);
            }

            Internal::Push {
                generation,
                message,
            } => self.on_push(generation, message),

            Internal::PushClosed {
                generation,
                permanent,
            } => {
                let cmds = self.stream.on_push_closed(generation, permanent);
                self.apply_stream(cmds);
            }

            Internal::Truncated { name, result } => {
                self.truncating = false;
                match result {
                    Ok(()) if self.session.selected() == Some(name.as_str()) => {
                        info!(name = %name, "log truncated");
                        let update = self.session.reset_after_truncate();
                        self.emit_update(update);
                        self.manual_fetch();
                    }
                    Ok(()) => {
                        debug!(name = %name, "truncated log no longer selected");
                        self.restart_stream();
                    }
                    Err(e) => {
                        self.emit(ViewEvent::Failed {
                            action: Action::Truncate,
                            error: e.into(),
                        });
                        self.restart_stream();
                    }
                }
            }
        }
    }

    fn on_fetch_done(
        &mut self,
        seq: u64,
        request: TailRequest,
        kind: FetchKind,
        result: Result<TailUpdate, ClientError>,
    ) {
        if seq != self.fetch_seq {
            return;
        }
        self.tasks.fetch = None;

        if kind.is_auto() && self.stream.writer() == Writer::Push {
            debug!(name = %request.name, "push owns the view, dropping poll result");
            self.session.abandon_fetch();
            return;
        }

        match self.session.finish_fetch(&request, kind, result, Instant::now()) {
            Ok(Some(update)) => self.emit_update(update),
            Ok(None) => {}
            Err(error) => self.emit(ViewEvent::Failed {
                action: Action::Refresh,
                error,
            }),
        }

        if kind == FetchKind::Manual && !self.truncating {
            self.restart_stream();
        }
    }

    fn on_push(&mut self, generation: u64, message: PushMessage) {
        if generation != self.stream.generation() || self.stream.writer() != Writer::Push {
            return;
        }
        match message {
            PushMessage::Tail(update) => {
                if let Some(update) = self.session.apply_push(update, Instant::now()) {
                    self.emit_update(update);
                }
            }
            PushMessage::Error(reason) => {
                warn!(reason = %reason, "push channel rejected, polling from now on");
                let cmds = self.stream.on_push_error(generation);
                self.apply_stream(cmds);
                self.emit(ViewEvent::Failed {
                    action: Action::Push,
                    error: SessionError::PushRejected(reason),
                });
            }
        }
    }

    // ========================================================================
    // Transport side effects
    // ========================================================================

    fn apply_stream(&mut self, commands: Vec<StreamCommand>) {
        for command in commands {
            match command {
                StreamCommand::StartPolling { interval } => self.spawn_poll(interval),
                StreamCommand::StopPolling => {
                    abort(&mut self.tasks.poll);
                    abort(&mut self.tasks.quick_poll);
                }
                StreamCommand::QuickPoll { after } => {
                    abort(&mut self.tasks.quick_poll);
                    self.tasks.quick_poll = Some(self.spawn_timer(after, || Internal::PollTick));
                }
                StreamCommand::OpenPush { generation } => self.spawn_push(generation),
                StreamCommand::ClosePush => abort(&mut self.tasks.push),
                StreamCommand::ScheduleReconnect { delay, .. } => {
                    abort(&mut self.tasks.reconnect);
                    self.tasks.reconnect = Some(self.spawn_timer(delay, || Internal::ReconnectDue));
                }
                StreamCommand::CancelReconnect => abort(&mut self.tasks.reconnect),
                StreamCommand::Exhausted { attempts } => self.emit(ViewEvent::Failed {
                    action: Action::Push,
                    error: SessionError::PushExhausted { attempts },
                }),
            }
        }
    }

    /// Start a fetch; false when the session refused (none selected or one in flight)
    fn spawn_fetch(&mut self, kind: FetchKind) -> bool {
        let Some(request) = self.session.begin_fetch(kind) else {
            return false;
        };
        self.fetch_seq += 1;
        let seq = self.fetch_seq;
        let api = Arc::clone(&self.api);
        let tx = self.internal.clone();
        self.tasks.fetch = Some(tokio::spawn(async move {
            let result = api.fetch_tail(&request).await;
            let _ = tx.send(Internal::FetchDone {
                seq,
                request,
                kind,
                result,
            });
        }));
        true
    }

    fn cancel_fetch(&mut self) {
        abort(&mut self.tasks.fetch);
        self.fetch_seq += 1;
        self.session.abandon_fetch();
    }

    fn spawn_poll(&mut self, period: Duration) {
        abort(&mut self.tasks.poll);
        let tx = self.internal.clone();
        let cancel = self.cancel.clone();
        self.tasks.poll = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {
                        if tx.send(Internal::PollTick).is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn spawn_timer(&self, after: Duration, event: fn() -> Internal) -> JoinHandle<()> {
        let tx = self.internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event());
        })
    }

    fn spawn_push(&mut self, generation: u64) {
        abort(&mut self.tasks.push);
        let Some(name) = self.session.selected().map(String::from) else {
            return;
        };
        let request = TailRequest {
            name,
            window: self.session.config().window(),
            cursor: self.session.cursor().cloned(),
        };
        let api = Arc::clone(&self.api);
        let tx = self.internal.clone();
        let cancel = self.cancel.clone();

        self.tasks.push = Some(tokio::spawn(async move {
            let mut messages = match api.open_push(&request).await {
                Ok(messages) => messages,
                Err(e) => {
                    debug!(generation, error = %e, "push connect failed");
                    let permanent = e.is_permanent_push_failure();
                    let _ = tx.send(Internal::PushClosed {
                        generation,
                        permanent,
                    });
                    return;
                }
            };
            let _ = tx.send(Internal::PushOpened { generation });

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    message = messages.next() => match message {
                        Some(Ok(message)) => {
                            let push = Internal::Push {
                                generation,
                                message,
                            };
                            if tx.send(push).is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            debug!(generation, error = %e, "push channel failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
            let _ = tx.send(Internal::PushClosed {
                generation,
                permanent: false,
            });
        }));
    }

    fn spawn_listing(&mut self) {
        let api = Arc::clone(&self.api);
        let tx = self.internal.clone();
        let cancel = self.cancel.clone();
        let period = self.session.config().list_interval();
        self.tasks.list = Some(tokio::spawn(async move {
            loop {
                let result = api.list_logs().await;
                if tx.send(Internal::Listed(result)).is_err() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        }));
    }

    fn spawn_capabilities(&mut self) {
        let api = Arc::clone(&self.api);
        let tx = self.internal.clone();
        self.tasks.other.push(tokio::spawn(async move {
            let websocket = match api.capabilities().await {
                Ok(caps) => caps.websocket,
                Err(e) => {
                    debug!(error = %e, "capabilities probe failed");
                    None
                }
            };
            let _ = tx.send(Internal::Capabilities(websocket));
        }));
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Queue an event; it goes out with the next published snapshot
    fn emit(&mut self, event: ViewEvent) {
        self.outbox.push(event);
    }

    fn emit_update(&mut self, update: ViewUpdate) {
        if update.diff != ViewDiff::Unchanged {
            self.emit(ViewEvent::Updated(update.diff));
        }
        if let Some(notice) = update.notice {
            self.emit(ViewEvent::Notice(notice));
        }
    }

    fn publish(&mut self) {
        let state = self.stream.state();
        if state != self.last_state {
            debug!(state = state.label(), "stream state changed");
            self.last_state = state;
            self.session.set_stream_state(state);
            self.emit(ViewEvent::StreamChanged(state));
        }
        *self.snapshot.write() = Arc::new(self.session.snapshot());
        for event in self.outbox.drain(..) {
            let _ = self.events.send(event);
        }
    }
}
