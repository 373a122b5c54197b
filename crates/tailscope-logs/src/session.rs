//! Per-view sync state.
//!
//! [`LogSession`] owns everything that belongs to one open log view: the
//! selected name, the line buffer, the read cursor, pause state and the
//! filter. It does no I/O; the runtime feeds it fetch and push results and
//! forwards the resulting [`ViewUpdate`]s to the presentation sink.

use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tailscope_client::{ClientError, TailRequest};
use tailscope_types::{Cursor, FilterConfig, LogDescriptor, StreamState, TailUpdate};

use crate::buffer::{LineBuffer, LineContext};
use crate::classifier::{LevelClassifier, LevelSupport};
use crate::config::{CONTEXT_RADIUS, SessionConfig};
use crate::error::SessionError;
use crate::filter::{CompiledFilter, FilterOutput};
use crate::pending::{PauseReconciler, Resumed};
use crate::text::format_line_for_copy;

/// Who asked for a fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchKind {
    /// Timer or push fallback; failures keep the current view
    Auto,
    /// User action; exits pause and reloads the full window
    Manual,
}

impl FetchKind {
    pub fn is_auto(self) -> bool {
        self == Self::Auto
    }
}

/// How the presentation layer should bring itself up to date
#[derive(Clone, Debug, PartialEq)]
pub enum ViewDiff {
    Unchanged,
    /// Append to what is shown after dropping `trimmed` lines from the top
    Append { lines: Vec<String>, trimmed: usize },
    /// Re-read the snapshot
    Full,
    /// Update parked while paused
    Paused { pending: usize },
}

/// Informational messages for the user
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// The server answered a cursor fetch with a full window
    Resynced { name: String },
    FileMissing { name: String },
    Truncated { name: String },
}

/// Outcome of feeding one event to the session
#[derive(Clone, Debug, PartialEq)]
pub struct ViewUpdate {
    pub diff: ViewDiff,
    pub notice: Option<Notice>,
}

impl ViewUpdate {
    fn diff(diff: ViewDiff) -> Self {
        Self { diff, notice: None }
    }
}

/// One row of the log list
#[derive(Clone, Debug, PartialEq)]
pub struct LogListing {
    pub descriptor: LogDescriptor,
    /// Grew since the previous listing and not looked at yet
    pub has_new: bool,
}

/// Immutable picture of a session for the presentation layer
#[derive(Clone, Debug, Default)]
pub struct ViewSnapshot {
    pub name: Option<String>,
    pub path: String,
    /// Filtered raw lines
    pub lines: Vec<String>,
    /// Raw buffer position of each entry of `lines`
    pub index_map: Vec<usize>,
    pub raw: LineBuffer,
    pub stats: String,
    pub filter: FilterConfig,
    pub level_supported: bool,
    pub regex_error: Option<String>,
    pub paused: bool,
    pub pending: usize,
    pub missing: bool,
    pub loading: bool,
    pub stream: StreamState,
    pub last_error: Option<String>,
    pub logs: Vec<LogListing>,
}

impl ViewSnapshot {
    /// Raw buffer position of a visible line
    pub fn raw_index(&self, visible_pos: usize) -> Option<usize> {
        self.index_map.get(visible_pos).copied()
    }

    /// Raw lines around a visible line
    pub fn line_context(&self, visible_pos: usize) -> Option<LineContext> {
        self.raw.context(self.raw_index(visible_pos)?, CONTEXT_RADIUS)
    }

    /// One visible line as it should be copied
    pub fn copy_line(&self, visible_pos: usize) -> Option<String> {
        let line = self.lines.get(visible_pos)?;
        Some(format_line_for_copy(line, self.filter.show_timestamps))
    }

    /// Every visible line, formatted for copy
    pub fn copy_visible(&self) -> String {
        self.lines
            .iter()
            .map(|l| format_line_for_copy(l, self.filter.show_timestamps))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the presentation layer currently shows
#[derive(Clone, Debug, PartialEq)]
struct Rendered {
    name: String,
    unfiltered: bool,
    show_timestamps: bool,
    count: usize,
}

/// State of one log view
pub struct LogSession {
    config: SessionConfig,
    selected: Option<String>,
    path: String,
    buffer: LineBuffer,
    cursor: Option<Cursor>,
    missing: bool,
    loading: bool,
    reconciler: PauseReconciler,

    classifier: LevelClassifier,
    level_support: LevelSupport,
    filter_config: FilterConfig,
    filter: CompiledFilter,
    view: FilterOutput,
    rendered: Option<Rendered>,

    descriptors: Vec<LogDescriptor>,
    has_new: HashSet<String>,

    last_notice_at: Option<Instant>,
    last_error: Option<String>,
    stream: StreamState,
}

impl LogSession {
    pub fn new(config: SessionConfig, filter: FilterConfig) -> Self {
        Self::with_classifier(config, filter, LevelClassifier::default())
    }

    pub fn with_classifier(
        config: SessionConfig,
        filter: FilterConfig,
        classifier: LevelClassifier,
    ) -> Self {
        let filter_config = filter.normalized();
        Self {
            buffer: LineBuffer::new(config.buffer_capacity()),
            reconciler: PauseReconciler::new(config.buffer_capacity(), config.pending_capacity()),
            filter: CompiledFilter::new(&filter_config, false),
            filter_config,
            config,
            selected: None,
            path: String::new(),
            cursor: None,
            missing: false,
            loading: false,
            classifier,
            level_support: LevelSupport::default(),
            view: FilterOutput::default(),
            rendered: None,
            descriptors: Vec::new(),
            has_new: HashSet::new(),
            last_notice_at: None,
            last_error: None,
            stream: StreamState::Idle,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_paused(&self) -> bool {
        self.reconciler.is_paused()
    }

    pub fn pending_count(&self) -> usize {
        self.reconciler.pending_count()
    }

    pub fn level_supported(&self) -> bool {
        self.level_support.supported
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter_config
    }

    pub fn set_stream_state(&mut self, state: StreamState) {
        self.stream = state;
    }

    // ========================================================================
    // Selection and fetch cycle
    // ========================================================================

    /// Switch to another log; everything tied to the old one is dropped
    pub fn select_log(&mut self, name: &str) -> ViewUpdate {
        if self.selected.as_deref() == Some(name) {
            return ViewUpdate::diff(ViewDiff::Unchanged);
        }
        debug!(name, "selecting log");
        self.selected = Some(name.to_string());
        self.has_new.remove(name);
        self.path = self
            .descriptor(name)
            .and_then(|d| d.path.clone())
            .unwrap_or_default();
        self.cursor = None;
        self.missing = false;
        self.loading = false;
        self.last_error = None;
        self.buffer.clear();
        self.reconciler.retarget(name);
        self.rendered = None;
        self.refresh_level_support();
        ViewUpdate::diff(self.full_diff())
    }

    /// Request for the next fetch, or `None` when one is already in flight.
    ///
    /// Manual fetches leave pause mode and ask for a fresh full window.
    pub fn begin_fetch(&mut self, kind: FetchKind) -> Option<TailRequest> {
        let name = self.selected.clone()?;
        if self.loading {
            return None;
        }
        if kind == FetchKind::Manual {
            self.reconciler.exit();
            self.cursor = None;
        }
        self.loading = true;
        Some(TailRequest {
            name,
            window: self.config.window(),
            cursor: self.cursor.clone(),
        })
    }

    /// Apply the outcome of a fetch started with [`LogSession::begin_fetch`]
    pub fn finish_fetch(
        &mut self,
        request: &TailRequest,
        kind: FetchKind,
        result: Result<TailUpdate, ClientError>,
        now: Instant,
    ) -> Result<Option<ViewUpdate>, SessionError> {
        self.loading = false;
        if self.selected.as_deref() != Some(request.name.as_str()) {
            debug!(name = %request.name, "discarding fetch for deselected log");
            return Ok(None);
        }

        match result {
            Ok(update) => {
                if kind == FetchKind::Manual {
                    self.last_error = None;
                }
                Ok(self.apply_update(update, kind.is_auto(), request.cursor.is_some(), now))
            }
            Err(e) if kind.is_auto() => {
                warn!(name = %request.name, error = %e, "background fetch failed");
                Ok(None)
            }
            Err(e) => {
                info!(name = %request.name, error = %e, "fetch failed");
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Give up on an in-flight fetch without looking at its result
    pub fn abandon_fetch(&mut self) {
        self.loading = false;
    }

    /// Apply a push channel update.
    ///
    /// A full frame is a fresh window, never an invalidated cursor. An append
    /// frame only extends the buffer when a cursor was already held.
    pub fn apply_push(&mut self, update: TailUpdate, now: Instant) -> Option<ViewUpdate> {
        let used_cursor = update.is_append() && self.cursor.is_some();
        self.apply_update(update, true, used_cursor, now)
    }

    /// Merge one tail update into the view.
    ///
    /// Returns `None` for updates addressed to a log other than the selected one.
    pub fn apply_update(
        &mut self,
        update: TailUpdate,
        is_auto: bool,
        used_cursor: bool,
        now: Instant,
    ) -> Option<ViewUpdate> {
        let name = self.selected.clone()?;
        if update.name != name {
            debug!(expected = %name, got = %update.name, "discarding stray update");
            return None;
        }

        self.cursor = if update.exists { update.cursor.clone() } else { None };
        self.has_new.remove(&name);
        self.refresh_descriptor(&update);
        if !update.path.is_empty() {
            self.path = update.path.clone();
        }

        if !update.exists {
            return Some(self.mark_missing(&name));
        }
        self.missing = false;

        let append = update.is_append() && used_cursor && is_auto;
        let notice = if is_auto && used_cursor && !update.is_append() {
            info!(name = %name, "cursor invalidated, window replaced");
            self.rate_limited_notice(Notice::Resynced { name: name.clone() }, now)
        } else {
            None
        };

        if is_auto && self.reconciler.is_paused() {
            let pending = self
                .reconciler
                .offer(&name, append, update.lines, &self.buffer);
            return Some(ViewUpdate {
                diff: ViewDiff::Paused { pending },
                notice,
            });
        }

        let diff = if append {
            let trimmed = self.buffer.append(update.lines.iter().cloned());
            self.append_diff(update.lines, trimmed)
        } else {
            self.buffer.replace(update.lines);
            self.refresh_level_support();
            self.full_diff()
        };
        Some(ViewUpdate { diff, notice })
    }

    fn mark_missing(&mut self, name: &str) -> ViewUpdate {
        let notice = (!self.missing).then(|| Notice::FileMissing {
            name: name.to_string(),
        });
        self.missing = true;
        self.buffer.clear();
        self.reconciler.retarget(name);
        self.refresh_level_support();
        ViewUpdate {
            diff: self.full_diff(),
            notice,
        }
    }

    fn rate_limited_notice(&mut self, notice: Notice, now: Instant) -> Option<Notice> {
        let window = self.config.rotation_notice_window();
        if let Some(last) = self.last_notice_at {
            if now.saturating_duration_since(last) < window {
                return None;
            }
        }
        self.last_notice_at = Some(now);
        Some(notice)
    }

    // ========================================================================
    // Pause / resume
    // ========================================================================

    pub fn pause(&mut self) {
        if let Some(name) = self.selected.clone() {
            if !self.reconciler.is_paused() {
                debug!(name = %name, "pausing view");
                self.reconciler.pause(&name);
            }
        }
    }

    /// Leave pause mode and merge what was missed
    pub fn resume(&mut self) -> ViewUpdate {
        let diff = match self.reconciler.resume() {
            None => ViewDiff::Unchanged,
            Some(Resumed::Snapshot(lines)) => {
                self.buffer.replace(lines);
                self.refresh_level_support();
                self.full_diff()
            }
            Some(Resumed::Lines(lines)) if lines.is_empty() => ViewDiff::Unchanged,
            Some(Resumed::Lines(lines)) => {
                let trimmed = self.buffer.append(lines.iter().cloned());
                self.append_diff(lines, trimmed)
            }
        };
        ViewUpdate::diff(diff)
    }

    /// Leave pause mode and drop what was missed
    pub fn exit_pause(&mut self) {
        self.reconciler.exit();
    }

    // ========================================================================
    // Filtering
    // ========================================================================

    pub fn set_filter(&mut self, config: FilterConfig) -> ViewUpdate {
        self.filter_config = config.normalized();
        self.filter = CompiledFilter::new(&self.filter_config, self.level_support.supported);
        if let Some(err) = self.filter.regex_error() {
            debug!(error = %err, "regex filter rejected");
        }
        ViewUpdate::diff(self.full_diff())
    }

    fn refresh_level_support(&mut self) -> bool {
        let support = LevelSupport::evaluate(&self.classifier, self.buffer.iter());
        let was = self.level_support.supported;
        let now = support.supported;
        self.level_support = support;
        if was == now {
            return false;
        }

        debug!(supported = now, "level filtering support changed");
        if was && !now {
            self.filter_config.reset_level();
        }
        self.filter = CompiledFilter::new(&self.filter_config, now);
        true
    }

    fn full_diff(&mut self) -> ViewDiff {
        self.view = self.filter.apply(self.buffer.iter(), &self.classifier);
        self.rendered = self.selected.clone().map(|name| Rendered {
            name,
            unfiltered: !self.filter.is_active(),
            show_timestamps: self.filter_config.show_timestamps,
            count: self.buffer.len(),
        });
        ViewDiff::Full
    }

    /// Diff for lines already appended to the buffer
    fn append_diff(&mut self, lines: Vec<String>, trimmed: usize) -> ViewDiff {
        let before = (self.buffer.len() + trimmed).saturating_sub(lines.len());
        let support_changed = self.refresh_level_support();

        let in_sync = match (&self.rendered, &self.selected) {
            (Some(r), Some(name)) => {
                &r.name == name
                    && r.unfiltered
                    && r.show_timestamps == self.filter_config.show_timestamps
                    && r.count == before
            }
            _ => false,
        };

        if support_changed || self.filter.is_active() || !in_sync {
            return self.full_diff();
        }
        if lines.is_empty() {
            return ViewDiff::Unchanged;
        }

        self.view = self.filter.apply(self.buffer.iter(), &self.classifier);
        if let Some(r) = self.rendered.as_mut() {
            r.count = self.buffer.len();
        }
        ViewDiff::Append { lines, trimmed }
    }

    // ========================================================================
    // Log list
    // ========================================================================

    pub fn descriptor(&self, name: &str) -> Option<&LogDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Take a fresh listing; returns a log to select when none is selected yet
    pub fn on_descriptors(&mut self, list: Vec<LogDescriptor>) -> Option<String> {
        for d in &list {
            if self.selected.as_deref() == Some(d.name.as_str()) {
                continue;
            }
            if self.descriptor(&d.name).is_some_and(|prev| d.grew_since(prev)) {
                self.has_new.insert(d.name.clone());
            }
        }
        self.has_new.retain(|n| list.iter().any(|d| &d.name == n));
        self.descriptors = list;

        if self.selected.is_some() {
            return None;
        }
        self.descriptors
            .iter()
            .find(|d| d.exists)
            .or_else(|| self.descriptors.first())
            .map(|d| d.name.clone())
    }

    fn refresh_descriptor(&mut self, update: &TailUpdate) {
        let Some(mut fresh) = update.descriptor() else {
            return;
        };
        match self.descriptors.iter_mut().find(|d| d.name == fresh.name) {
            Some(prev) => {
                if update.inode.is_none() {
                    fresh.inode = prev.inode;
                }
                if fresh.path.is_none() {
                    fresh.path = prev.path.clone();
                }
                if fresh.rotated_from(prev) {
                    debug!(name = %fresh.name, "log file rotated");
                }
                *prev = fresh;
            }
            None => self.descriptors.push(fresh),
        }
    }

    pub fn has_new(&self, name: &str) -> bool {
        self.has_new.contains(name)
    }

    // ========================================================================
    // Truncate and line actions
    // ========================================================================

    /// Forget everything held for the selected log after a successful truncate
    pub fn reset_after_truncate(&mut self) -> ViewUpdate {
        self.cursor = None;
        self.buffer.clear();
        self.reconciler.exit();
        self.refresh_level_support();
        let notice = self
            .selected
            .clone()
            .map(|name| Notice::Truncated { name });
        ViewUpdate {
            diff: self.full_diff(),
            notice,
        }
    }

    /// Raw buffer index of a filtered line
    pub fn raw_index(&self, filtered_pos: usize) -> Option<usize> {
        self.view.raw_index(filtered_pos)
    }

    pub fn line_context(&self, raw_index: usize) -> Option<LineContext> {
        self.buffer.context(raw_index, CONTEXT_RADIUS)
    }

    pub fn copy_visible(&self) -> String {
        self.view
            .lines
            .iter()
            .map(|l| format_line_for_copy(l, self.filter_config.show_timestamps))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            name: self.selected.clone(),
            path: self.path.clone(),
            lines: self.view.lines.clone(),
            index_map: self.view.index_map.clone(),
            raw: self.buffer.clone(),
            stats: self.filter.stats(self.view.lines.len(), self.buffer.len()),
            filter: self.filter_config.clone(),
            level_supported: self.level_support.supported,
            regex_error: self.filter.regex_error().map(String::from),
            paused: self.reconciler.is_paused(),
            pending: self.reconciler.pending_count(),
            missing: self.missing,
            loading: self.loading,
            stream: self.stream,
            last_error: self.last_error.clone(),
            logs: self
                .descriptors
                .iter()
                .map(|d| LogListing {
                    descriptor: d.clone(),
                    has_new: self.has_new.contains(&d.name),
                })
                .collect(),
        }
    }
}
