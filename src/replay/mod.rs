//! Causal replay engine.
//!
//! State is never mutated directly: every change is a command emitted at a
//! logical order. Out-of-order commands trigger a rebuild from a fresh
//! instance, so the live state always equals a replay of the sorted log.
//!
//! - [`Replayable`]: the state contract
//! - [`Replayer`]: log, live state, failure diagnostics
//! - [`LogEntry`], [`ReplayFailure`]: log and diagnostics items

mod engine;
mod log;

pub use engine::{EntryOf, FailureOf, Preview, Replayable, Replayer};
pub use log::{LogEntry, ReplayFailure};
