//! # Event bus shared by every service.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]: the queue, the
//! observer, the records store and the service manager publish to it; the
//! subscriber listener and the aggregated change broadcaster consume it.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                  Listeners:
//!   PendingCarQueue ──┐          ┌──► subscriber_listener ──► SubscriberSet
//!   RunningObserver ──┼──► Bus ──┤        (in TimingSystem)
//!   Records         ──┤          └──► AggregatedChangeBroadcaster ──► watch<()>
//!   ServiceManager  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and never awaits, so it
//!   is safe to call while holding an aggregate lock.
//! - **Bounded capacity**: one ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers. Dropped if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
