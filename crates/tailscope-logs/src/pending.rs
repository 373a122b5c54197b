//! Pause/resume reconciliation.
//!
//! While the view is paused, updates are parked here instead of touching the
//! live buffer. Appends collect into a pending list; a full window (rotation,
//! cursor invalidation) becomes a pending snapshot which later appends extend.
//! The two are mutually exclusive.

use std::collections::VecDeque;

use crate::buffer::LineBuffer;

/// Longest backward overlap checked when estimating new lines
const MAX_OVERLAP: usize = 200;

/// Result of comparing a fresh full window with the lines already held
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Estimate {
    /// Lines in the window that were not already held
    pub new_count: usize,
    /// Position in the window of the last already-held line
    pub anchor: Option<usize>,
}

/// Estimate how many lines of `full` are new relative to `base`.
///
/// Finds the occurrence of `base`'s last line in `full` with the longest
/// backward overlap (capped at 200, ties go to the later occurrence).
/// Without any occurrence, the whole window counts as new.
pub fn estimate_new_lines(base: &LineBuffer, full: &[String]) -> Estimate {
    let none = Estimate {
        new_count: full.len(),
        anchor: None,
    };
    if full.is_empty() {
        return Estimate {
            new_count: 0,
            anchor: None,
        };
    }
    let Some(base_last) = base.len().checked_sub(1).and_then(|i| base.get(i)) else {
        return none;
    };

    let mut best: Option<(usize, usize)> = None;
    for i in (0..full.len()).rev() {
        if full[i] != base_last {
            continue;
        }
        let mut overlap = 1;
        while overlap < MAX_OVERLAP
            && overlap < base.len()
            && overlap <= i
            && base.get(base.len() - 1 - overlap) == Some(full[i - overlap].as_str())
        {
            overlap += 1;
        }
        // scanning from the end, so only a strictly longer overlap replaces
        if best.is_none_or(|(_, o)| overlap > o) {
            best = Some((i, overlap));
        }
        if overlap >= MAX_OVERLAP {
            break;
        }
    }

    match best {
        Some((i, _)) => Estimate {
            new_count: full.len() - (i + 1),
            anchor: Some(i),
        },
        None => none,
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Pending {
    Lines(VecDeque<String>),
    Snapshot(VecDeque<String>),
}

#[derive(Clone, Debug)]
struct PendingState {
    for_name: String,
    pending: Pending,
    count: usize,
}

impl PendingState {
    fn new(name: &str) -> Self {
        Self {
            for_name: name.to_string(),
            pending: Pending::Lines(VecDeque::new()),
            count: 0,
        }
    }
}

/// What to do with the live buffer on resume
#[derive(Clone, Debug, PartialEq)]
pub enum Resumed {
    /// Replace the buffer
    Snapshot(Vec<String>),
    /// Append to the buffer; may be empty
    Lines(Vec<String>),
}

/// Live/paused state machine holding updates missed while paused
#[derive(Clone, Debug)]
pub struct PauseReconciler {
    state: Option<PendingState>,
    buffer_limit: usize,
    pending_limit: usize,
}

impl PauseReconciler {
    pub fn new(buffer_limit: usize, pending_limit: usize) -> Self {
        Self {
            state: None,
            buffer_limit: buffer_limit.max(1),
            pending_limit: pending_limit.max(1),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_some()
    }

    /// Missed lines so far, capped at the pending limit
    pub fn pending_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.count)
    }

    /// Enter paused mode for `name`, dropping anything pending
    pub fn pause(&mut self, name: &str) {
        self.state = Some(PendingState::new(name));
    }

    /// Point an active pause at another log, dropping anything pending
    pub fn retarget(&mut self, name: &str) {
        if self.is_paused() {
            self.pause(name);
        }
    }

    /// Leave paused mode and discard pending updates
    pub fn exit(&mut self) {
        self.state = None;
    }

    /// Park an update; returns the pending count afterwards.
    ///
    /// `append` is true only for append-mode updates fetched with a cursor.
    /// `live` is the buffer as the user last saw it.
    pub fn offer(
        &mut self,
        name: &str,
        append: bool,
        lines: Vec<String>,
        live: &LineBuffer,
    ) -> usize {
        let (buffer_limit, pending_limit) = (self.buffer_limit, self.pending_limit);
        let Some(state) = self.state.as_mut() else {
            return 0;
        };
        if state.for_name != name {
            *state = PendingState::new(name);
        }

        if append {
            let added = lines.len();
            match &mut state.pending {
                Pending::Snapshot(snapshot) => {
                    snapshot.extend(lines);
                    trim_front(snapshot, buffer_limit);
                }
                Pending::Lines(pending) => {
                    pending.extend(lines);
                    trim_front(pending, pending_limit);
                }
            }
            state.count = (state.count + added).min(pending_limit);
        } else {
            let mut snapshot = VecDeque::from(lines);
            trim_front(&mut snapshot, buffer_limit);
            let estimate = estimate_new_lines(live, snapshot.make_contiguous());
            state.count = estimate.new_count.min(pending_limit);
            state.pending = Pending::Snapshot(snapshot);
        }
        state.count
    }

    /// Leave paused mode, handing back what was missed
    pub fn resume(&mut self) -> Option<Resumed> {
        let state = self.state.take()?;
        Some(match state.pending {
            Pending::Snapshot(snapshot) => Resumed::Snapshot(snapshot.into()),
            Pending::Lines(lines) => Resumed::Lines(lines.into()),
        })
    }
}

fn trim_front(lines: &mut VecDeque<String>, limit: usize) {
    let excess = lines.len().saturating_sub(limit);
    lines.drain(..excess);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    fn paused_for(rec: &PauseReconciler) -> Option<&str> {
        rec.state.as_ref().map(|s| s.for_name.as_str())
    }

    fn has_snapshot(rec: &PauseReconciler) -> bool {
        matches!(
            rec.state,
            Some(PendingState {
                pending: Pending::Snapshot(_),
                ..
            })
        )
    }

    fn buffer(lines: &[&str]) -> LineBuffer {
        let mut buf = LineBuffer::new(100);
        buf.append(owned(lines));
        buf
    }

    #[test]
    fn test_estimate_with_overlap() {
        let est = estimate_new_lines(&buffer(&["a", "b", "c"]), &owned(&["b", "c", "d"]));
        assert_eq!(est.new_count, 1);
        assert_eq!(est.anchor, Some(1));
    }

    #[test]
    fn test_estimate_without_overlap() {
        let est = estimate_new_lines(&buffer(&["a", "b", "c"]), &owned(&["x", "y", "z"]));
        assert_eq!(est.new_count, 3);
        assert_eq!(est.anchor, None);
    }

    #[test]
    fn test_estimate_prefers_longest_overlap() {
        // "c" appears twice; only the second occurrence is preceded by "b"
        let est = estimate_new_lines(&buffer(&["a", "b", "c"]), &owned(&["b", "c", "x", "c", "y"]));
        assert_eq!(est.anchor, Some(1));
        assert_eq!(est.new_count, 3);

        // equal overlaps: the later occurrence wins
        let est = estimate_new_lines(&buffer(&["c"]), &owned(&["c", "x", "c", "y"]));
        assert_eq!(est.anchor, Some(2));
        assert_eq!(est.new_count, 1);
    }

    #[test]
    fn test_estimate_edges() {
        assert_eq!(estimate_new_lines(&buffer(&["a"]), &[]).new_count, 0);
        assert_eq!(estimate_new_lines(&buffer(&[]), &owned(&["a", "b"])).new_count, 2);
    }

    #[test]
    fn test_appends_accumulate_while_paused() {
        let live = buffer(&["a"]);
        let mut rec = PauseReconciler::new(100, 100);
        rec.pause("core");
        assert_eq!(rec.offer("core", true, owned(&["b", "c"]), &live), 2);
        assert_eq!(rec.offer("core", true, owned(&["d"]), &live), 3);
        assert!(!has_snapshot(&rec));
        assert_eq!(rec.resume(), Some(Resumed::Lines(owned(&["b", "c", "d"]))));
        assert!(!rec.is_paused());
    }

    #[test]
    fn test_full_update_becomes_snapshot_and_absorbs_appends() {
        let live = buffer(&["a", "b", "c"]);
        let mut rec = PauseReconciler::new(100, 100);
        rec.pause("core");
        rec.offer("core", true, owned(&["d"]), &live);
        assert_eq!(rec.offer("core", false, owned(&["b", "c", "d", "e"]), &live), 2);
        assert!(has_snapshot(&rec));

        assert_eq!(rec.offer("core", true, owned(&["f"]), &live), 3);
        assert_eq!(
            rec.resume(),
            Some(Resumed::Snapshot(owned(&["b", "c", "d", "e", "f"])))
        );
    }

    #[test]
    fn test_pending_count_is_capped() {
        let live = buffer(&[]);
        let mut rec = PauseReconciler::new(4, 3);
        rec.pause("core");
        assert_eq!(rec.offer("core", true, owned(&["1", "2", "3", "4", "5"]), &live), 3);
        assert_eq!(rec.resume(), Some(Resumed::Lines(owned(&["3", "4", "5"]))));
    }

    #[test]
    fn test_switching_target_clears_pending() {
        let live = buffer(&[]);
        let mut rec = PauseReconciler::new(100, 100);
        rec.pause("core");
        rec.offer("core", true, owned(&["x"]), &live);
        rec.offer("dns", true, owned(&["y"]), &live);
        assert_eq!(paused_for(&rec), Some("dns"));
        assert_eq!(rec.pending_count(), 1);

        rec.retarget("vpn");
        assert_eq!(rec.pending_count(), 0);
        assert_eq!(paused_for(&rec), Some("vpn"));

        rec.exit();
        assert_eq!(rec.resume(), None);
        assert_eq!(rec.offer("vpn", true, owned(&["z"]), &live), 0);
    }

    #[derive(Clone, Debug)]
    enum Update {
        Append(Vec<u8>),
        Full(Vec<u8>),
    }

    fn update() -> impl Strategy<Value = Update> {
        prop_oneof![
            3 => prop::collection::vec(any::<u8>(), 0..8).prop_map(Update::Append),
            1 => prop::collection::vec(any::<u8>(), 0..12).prop_map(Update::Full),
        ]
    }

    fn lines_of(items: &[u8]) -> Vec<String> {
        items.iter().map(|n| format!("line {}", n)).collect()
    }

    proptest! {
        #[test]
        fn test_resume_matches_live_application(
            cap in 1usize..10,
            initial in prop::collection::vec(any::<u8>(), 0..10),
            updates in prop::collection::vec(update(), 0..20),
        ) {
            let mut live = LineBuffer::with_exact_capacity(cap);
            live.append(lines_of(&initial));
            let mut paused = live.clone();

            for u in &updates {
                match u {
                    Update::Append(items) => { live.append(lines_of(items)); }
                    Update::Full(items) => { live.replace(lines_of(items)); }
                }
            }

            let mut rec = PauseReconciler::new(cap, cap);
            rec.pause("core");
            for u in &updates {
                match u {
                    Update::Append(items) => rec.offer("core", true, lines_of(items), &paused),
                    Update::Full(items) => rec.offer("core", false, lines_of(items), &paused),
                };
            }
            match rec.resume() {
                Some(Resumed::Snapshot(lines)) => { paused.replace(lines); }
                Some(Resumed::Lines(lines)) => { paused.append(lines); }
                None => prop_assert!(false, "reconciler was paused"),
            }

            prop_assert_eq!(paused.to_vec(), live.to_vec());
        }
    }
}
