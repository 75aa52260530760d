//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the timing services, the service
//! manager and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `PendingCarQueue`, `RunningObserver`, `Records`,
//!   `ServiceManager`, `SubscriberSet` workers (overflow/panic), `TimingSystem`
//!   (shutdown).
//! - **Consumers**: `TimingSystem::subscriber_listener()` (fans out to
//!   `SubscriberSet`) and `AggregatedChangeBroadcaster` (its own listener).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
