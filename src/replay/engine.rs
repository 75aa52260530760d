//! # Replayer: ordered command log with rebuild on backdated insert.
//!
//! ```text
//! emit(order, cmd)
//!   ├─ order >= last_order ─► append, apply to live state, return result
//!   │                         (a failure is also pushed to `errors`)
//!   └─ order <  last_order ─► clear errors
//!                             insert after every entry with entry.order <= order
//!                             state = factory()
//!                             replay every entry, recording each failure
//!                             return the inserted command's result
//! ```
//!
//! `preview(commands)` runs the same placement and replay on a scratch state
//! and leaves the replayer untouched.
//!
//! ## Rules
//! - Failed commands stay in the log; a later backdated insert may make them
//!   succeed on replay.
//! - Replay is deterministic: equal logs produce equal states.
//! - Never blocks, never awaits.

use std::fmt;

use super::log::{LogEntry, ReplayFailure};

/// A state type that can be rebuilt from an ordered command log.
pub trait Replayable {
    /// Sequencing key.
    type Order: Ord + Copy + fmt::Debug;
    /// Command applied to the state.
    type Command: Clone + fmt::Debug;
    /// Result of a successful command.
    type Output;
    /// Result of a failed command.
    type Error: Clone + fmt::Debug + fmt::Display;

    /// Applies one command. A failing command must leave `self` unchanged.
    fn apply(&mut self, order: Self::Order, cmd: &Self::Command)
        -> Result<Self::Output, Self::Error>;
}

type Factory<M> = Box<dyn Fn() -> M + Send + Sync>;

/// Failure type recorded for `M`.
pub type FailureOf<M> =
    ReplayFailure<<M as Replayable>::Order, <M as Replayable>::Command, <M as Replayable>::Error>;

/// Entry type stored for `M`.
pub type EntryOf<M> = LogEntry<<M as Replayable>::Order, <M as Replayable>::Command>;

/// Outcome of [`Replayer::preview`].
pub struct Preview<M: Replayable> {
    /// State after replaying the log with the previewed commands placed.
    pub state: M,
    /// One result per previewed command, in the order given.
    pub results: Vec<Result<M::Output, M::Error>>,
}

/// Causal replay engine over a [`Replayable`] state.
pub struct Replayer<M: Replayable> {
    factory: Factory<M>,
    current: M,
    log: Vec<EntryOf<M>>,
    last_order: Option<M::Order>,
    errors: Vec<FailureOf<M>>,
    next_seq: u64,
    rebuilds: u64,
}

impl<M: Replayable> Replayer<M> {
    /// Creates a replayer; the initial state comes from `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        let current = factory();
        Self {
            factory: Box::new(factory),
            current,
            log: Vec::new(),
            last_order: None,
            errors: Vec::new(),
            next_seq: 0,
            rebuilds: 0,
        }
    }

    /// Emits a command at `order`.
    pub fn emit(&mut self, order: M::Order, command: M::Command) -> Result<M::Output, M::Error> {
        let entry = LogEntry {
            order,
            command,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        match self.last_order {
            Some(last) if order < last => self.insert_and_rebuild(entry),
            _ => self.append(entry),
        }
    }

    fn append(&mut self, entry: EntryOf<M>) -> Result<M::Output, M::Error> {
        let result = self.current.apply(entry.order, &entry.command);
        if let Err(error) = &result {
            self.errors.push(ReplayFailure {
                entry: entry.clone(),
                error: error.clone(),
            });
        }
        self.last_order = Some(entry.order);
        self.log.push(entry);
        result
    }

    fn insert_and_rebuild(&mut self, entry: EntryOf<M>) -> Result<M::Output, M::Error> {
        let at = self.log.partition_point(|e| e.order <= entry.order);
        self.log.insert(at, entry);

        let mut state = (self.factory)();
        let mut errors = Vec::new();
        let mut replay = |state: &mut M, e: &EntryOf<M>| {
            let result = state.apply(e.order, &e.command);
            if let Err(error) = &result {
                errors.push(ReplayFailure {
                    entry: e.clone(),
                    error: error.clone(),
                });
            }
            result
        };

        let (before, rest) = self.log.split_at(at);
        for e in before {
            let _ = replay(&mut state, e);
        }
        let result = replay(&mut state, &rest[0]);
        for e in &rest[1..] {
            let _ = replay(&mut state, e);
        }

        self.errors = errors;
        self.current = state;
        self.rebuilds += 1;
        result
    }

    /// Replays the log as if `commands` had been emitted in turn, without
    /// changing the live state, the log or the recorded errors.
    pub fn preview<I>(&self, commands: I) -> Preview<M>
    where
        I: IntoIterator<Item = (M::Order, M::Command)>,
    {
        let mut log = self.log.clone();
        let mut placed = Vec::new();
        for (seq, (order, command)) in (self.next_seq..).zip(commands) {
            let at = log.partition_point(|e| e.order <= order);
            log.insert(at, LogEntry { order, command, seq });
            placed.push(seq);
        }

        let mut state = (self.factory)();
        let mut results: Vec<Option<Result<M::Output, M::Error>>> =
            placed.iter().map(|_| None).collect();
        for e in &log {
            let result = state.apply(e.order, &e.command);
            if let Some(slot) = placed.iter().position(|&s| s == e.seq) {
                results[slot] = Some(result);
            }
        }
        Preview {
            state,
            results: results.into_iter().flatten().collect(),
        }
    }

    /// Live state.
    pub fn state(&self) -> &M {
        &self.current
    }

    /// Sorted command log.
    pub fn log(&self) -> &[EntryOf<M>] {
        &self.log
    }

    /// Failures accumulated since the last rebuild.
    pub fn errors(&self) -> &[FailureOf<M>] {
        &self.errors
    }

    /// Largest order seen so far.
    pub fn last_order(&self) -> Option<M::Order> {
        self.last_order
    }

    /// Number of rebuilds performed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

impl<M: Replayable + fmt::Debug> fmt::Debug for Replayer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replayer")
            .field("current", &self.current)
            .field("entries", &self.log.len())
            .field("last_order", &self.last_order)
            .field("errors", &self.errors.len())
            .field("rebuilds", &self.rebuilds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends command values; rejects a command equal to the current tail.
    #[derive(Debug, Default, PartialEq)]
    struct Trace(Vec<u32>);

    impl Replayable for Trace {
        type Order = i64;
        type Command = u32;
        type Output = usize;
        type Error = String;

        fn apply(&mut self, _order: i64, cmd: &u32) -> Result<usize, String> {
            if self.0.last() == Some(cmd) {
                return Err(format!("duplicate {cmd}"));
            }
            self.0.push(*cmd);
            Ok(self.0.len())
        }
    }

    #[test]
    fn test_in_order_emits_apply_without_rebuild() {
        let mut r = Replayer::new(Trace::default);
        assert_eq!(r.emit(1, 10), Ok(1));
        assert_eq!(r.emit(2, 20), Ok(2));
        assert_eq!(r.emit(2, 30), Ok(3));
        assert_eq!(r.state().0, vec![10, 20, 30]);
        assert_eq!(r.rebuilds(), 0);
        assert_eq!(r.last_order(), Some(2));
    }

    #[test]
    fn test_backdated_emit_rebuilds_in_order() {
        let mut r = Replayer::new(Trace::default);
        r.emit(10, 1).unwrap();
        r.emit(30, 3).unwrap();
        assert_eq!(r.emit(20, 2), Ok(2));
        assert_eq!(r.state().0, vec![1, 2, 3]);
        assert_eq!(r.rebuilds(), 1);
        assert_eq!(r.last_order(), Some(30));
    }

    #[test]
    fn test_equal_orders_keep_insertion_order() {
        let mut r = Replayer::new(Trace::default);
        r.emit(5, 1).unwrap();
        r.emit(5, 2).unwrap();
        r.emit(9, 9).unwrap();
        r.emit(5, 3).unwrap();
        assert_eq!(r.state().0, vec![1, 2, 3, 9]);
        let seqs: Vec<u64> = r.log().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_failures_stay_in_log_and_errors_reset_on_rebuild() {
        let mut r = Replayer::new(Trace::default);
        r.emit(10, 7).unwrap();
        assert!(r.emit(20, 7).is_err());
        assert_eq!(r.errors().len(), 1);
        assert_eq!(r.log().len(), 2);

        // A backdated 8 between the two 7s makes the failed one succeed.
        assert_eq!(r.emit(15, 8), Ok(2));
        assert!(r.errors().is_empty());
        assert_eq!(r.state().0, vec![7, 8, 7]);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let cmds = [(30, 3), (10, 1), (20, 2), (10, 4), (5, 4)];
        let mut a = Replayer::new(Trace::default);
        let mut b = Replayer::new(Trace::default);
        for (o, c) in cmds {
            let _ = a.emit(o, c);
            let _ = b.emit(o, c);
        }
        assert_eq!(a.state(), b.state());
        assert_eq!(a.log(), b.log());

        let mut fresh = Trace::default();
        for e in a.log() {
            let _ = fresh.apply(e.order, &e.command);
        }
        assert_eq!(&fresh, a.state());
    }

    #[test]
    fn test_failed_command_leaves_same_state_as_omitting_it() {
        let cmds = [(10, 1), (20, 5), (30, 5), (40, 3), (35, 2)];
        let mut with_failures = Replayer::new(Trace::default);
        for (o, c) in cmds {
            let _ = with_failures.emit(o, c);
        }
        let failed: Vec<u64> = with_failures.errors().iter().map(|f| f.entry.seq).collect();
        assert_eq!(failed.len(), 1);

        let mut without = Replayer::new(Trace::default);
        for e in with_failures.log().iter().filter(|e| !failed.contains(&e.seq)) {
            without.emit(e.order, e.command).unwrap();
        }
        assert_eq!(without.state().0, vec![1, 5, 2, 3]);
        assert_eq!(without.state(), with_failures.state());
        assert!(without.errors().is_empty());
    }

    #[test]
    fn test_preview_matches_emit_without_mutating() {
        let mut r = Replayer::new(Trace::default);
        r.emit(10, 7).unwrap();
        assert!(r.emit(20, 7).is_err());

        let preview = r.preview([(15, 8), (50, 9)]);
        assert_eq!(preview.state.0, vec![7, 8, 7, 9]);
        assert_eq!(preview.results, vec![Ok(2), Ok(4)]);
        assert_eq!(r.state().0, vec![7]);
        assert_eq!(r.log().len(), 2);
        assert_eq!(r.errors().len(), 1);

        r.emit(15, 8).unwrap();
        r.emit(50, 9).unwrap();
        assert_eq!(r.state(), &preview.state);
    }
}
