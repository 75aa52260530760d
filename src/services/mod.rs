//! Timing services: the four cooperating aggregates.
//!
//! ```text
//!            consume_next            insert (promotion)
//! PendingCarQueue ◄──────── RunningObserver ────────► Records
//!        │                        │                      │
//!        └──── publish ──► Bus ◄──┴──────── publish ─────┘
//!                           │
//!                           └──► AggregatedChangeBroadcaster ──► Subscription<()>
//! ```
//!
//! Each aggregate serializes its mutations behind a `tokio::sync::RwLock`,
//! keeps a `watch` channel with its latest snapshot, and publishes a change
//! event on the [`Bus`](crate::events::Bus) after every mutation.
//!
//! - [`PendingCarQueue`]: cars waiting to start
//! - [`RunningObserver`]: replayed competition, stale guard, promotion
//! - [`Records`]: finalized, editable results with history
//! - [`AggregatedChangeBroadcaster`]: coalesced change signal
//! - [`Subscription`]: watch-backed snapshot stream

mod broadcaster;
mod pending_car_queue;
mod records;
mod running_observer;
mod subscription;

pub use broadcaster::AggregatedChangeBroadcaster;
pub use pending_car_queue::{PendingCar, PendingCarQueue};
pub use records::{MetadataRevision, Record, Records};
pub use running_observer::{
    FlipOutcome, ObserverSnapshot, ReplayErrorView, RunningObserver, TrackSnapshot,
};
pub use subscription::Subscription;
