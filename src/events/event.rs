//! # Events published by the timing services and the service manager.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Change events**: an aggregate (queue, observer, records) was mutated
//! - **Service lifecycle events**: an external process changed state
//! - **Subscriber events**: a user subscriber dropped an event or panicked
//! - **Shutdown events**: runtime shutdown progress
//!
//! The [`Event`] struct carries additional metadata such as the wall-clock
//! timestamp, the source (track, record or service id) and a reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events are
//! delivered out of order.
//!
//! ## Example
//! ```rust
//! use racetimer::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ServiceExited)
//!     .with_source("sensor")
//!     .with_reason("exit status: 1");
//!
//! assert!(ev.is_change());
//! assert_eq!(ev.source.as_deref(), Some("sensor"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Change events ===
    /// The pending car queue was mutated.
    ///
    /// Sets:
    /// - `reason`: operation name (e.g. "insert", "consume_next")
    PendingCarQueueChanged,

    /// The running observer state changed (start, stop, metadata, rebuild).
    ///
    /// Sets:
    /// - `source`: track id
    /// - `reason`: operation name
    RunningObserverChanged,

    /// The records store was mutated.
    ///
    /// Sets:
    /// - `source`: record id (absent for bulk operations)
    /// - `reason`: operation name
    RecordsChanged,

    /// A backdated command forced a rebuild of the competition.
    ///
    /// Sets:
    /// - `source`: track id
    /// - `reason`: number of failures after the rebuild
    ReplayRewound,

    // === Service lifecycle events ===
    /// A service launch is about to spawn its process.
    ///
    /// Sets:
    /// - `source`: service id
    ServiceStarting,

    /// The process was spawned.
    ///
    /// Sets:
    /// - `source`: service id
    /// - `reason`: pid
    ServiceStarted,

    /// A stop was requested; the process is being killed.
    ///
    /// Sets:
    /// - `source`: service id
    ServiceStopping,

    /// The process exited after a stop request.
    ///
    /// Sets:
    /// - `source`: service id
    ServiceStopped,

    /// The process exited on its own.
    ///
    /// Sets:
    /// - `source`: service id
    /// - `reason`: exit status
    ServiceExited,

    /// Spawning the process failed.
    ///
    /// Sets:
    /// - `source`: service id
    /// - `reason`: spawn error
    ServiceFailed,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All services stopped within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some services did not stop in time.
    ///
    /// Sets:
    /// - `reason`: stuck service ids
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Track, record, service or subscriber the event is about.
    pub source: Option<Arc<str>>,
    /// Human-readable detail.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the entity the event is about.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }

    /// Whether observers of the aggregated change stream must be notified.
    ///
    /// Aggregate mutations and service lifecycle transitions count; subscriber
    /// and shutdown diagnostics do not.
    pub fn is_change(&self) -> bool {
        matches!(
            self.kind,
            EventKind::PendingCarQueueChanged
                | EventKind::RunningObserverChanged
                | EventKind::RecordsChanged
                | EventKind::ReplayRewound
                | EventKind::ServiceStarting
                | EventKind::ServiceStarted
                | EventKind::ServiceStopping
                | EventKind::ServiceStopped
                | EventKind::ServiceExited
                | EventKind::ServiceFailed
        )
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::RecordsChanged);
        let b = Event::new(EventKind::RecordsChanged);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_diagnostics_are_not_changes() {
        assert!(!Event::subscriber_overflow("log", "full").is_change());
        assert!(!Event::new(EventKind::ShutdownRequested).is_change());
        assert!(Event::new(EventKind::PendingCarQueueChanged).is_change());
    }
}
