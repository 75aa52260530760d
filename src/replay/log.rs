//! Log entries and replay failures.

use std::fmt;

/// One command in the replay log.
///
/// Entries are kept sorted by `(order, seq)`: `seq` is the insertion sequence
/// number, so commands with equal order keep the order they were emitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry<O, C> {
    /// Logical order (the command timestamp).
    pub order: O,
    /// The command itself.
    pub command: C,
    /// Insertion sequence number.
    pub seq: u64,
}

/// A log entry that failed to apply during replay (or on first emit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure<O, C, E> {
    /// The failing entry.
    pub entry: LogEntry<O, C>,
    /// The error it produced.
    pub error: E,
}

impl<O: fmt::Debug, C: fmt::Debug, E: fmt::Display> fmt::Display for ReplayFailure<O, C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={} order={:?} command={:?}: {}",
            self.entry.seq, self.entry.order, self.entry.command, self.error
        )
    }
}
