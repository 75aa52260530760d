//! # racetimer
//!
//! **racetimer** is a causal, event-sourced timing engine for multi-track
//! racing competitions.
//!
//! It tracks which car is queued, which cars are running on which track and
//! their finish times, and fans every change out to independent observers
//! (displays, spreadsheet exporters, music controllers). Start/stop/edit
//! commands may arrive out of chronological order: the competition state is
//! always derived by replaying a timestamp-ordered command log.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   operator / sensor / GUI
//!            │ HTTP (rpc)
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TimingSystem (runtime shell)                                     │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! │  - ServiceManager (supervises external processes)                 │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               ▼
//! ┌──────────────┐   ┌────────────────┐   ┌──────────┐   ┌─────────────┐
//! │PendingCarQueue│◄──│RunningObserver │──►│ Records  │   │ Aggregated  │
//! │  (FIFO)      │pop│ Replayer<      │ins│ (history)│   │ Change      │
//! └──────┬───────┘   │  Competition>  │   └────┬─────┘   │ Broadcaster │
//!        │           └───────┬────────┘        │         └──────▲──────┘
//!        │ Publishes         │ Publishes       │ Publishes      │
//!        ▼                   ▼                 ▼                │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Command flow
//! ```text
//! start(ts) ──► pop queue head (or default car) ──► RegisterPending@ts, Start@ts
//!           ──► backdated? dry-run: reject if a promoted result would change
//!           ──► emit RegisterPending@ts, emit Start@ts
//!                  │
//!                  ├─ ts >= last order ─► apply to live Competition
//!                  └─ ts <  last order ─► rebuild from factory, replay sorted log
//!           ──► promote newly finished cars into Records, raise horizon
//!           ──► publish RunningObserverChanged (+ queue/records changes)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                           |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Replay**        | Timestamp-ordered log with stable tie-break and rebuild.     | [`Replayable`], [`Replayer`]                 |
//! | **Domain**        | Timers, cars, tracks with overwrap limit.                    | [`Competition`], [`CompetitionCommand`]      |
//! | **Services**      | Queue, observer, records, change broadcaster.                | [`RunningObserver`], [`Records`]             |
//! | **Supervision**   | External process lifecycle, no auto-restart.                 | [`ServiceManager`]                           |
//! | **Client pool**   | Ref-counted shared upstream subscription.                    | [`ChangePool`], [`ChangeSource`]             |
//! | **Subscriber API**| Hook into bus events (logging, custom subscribers).          | [`Subscribe`]                                |
//! | **Errors**        | Typed command and runtime errors.                            | [`TimingError`], [`RuntimeError`]            |
//!
//! ## Optional features
//! - `rpc` (default): axum HTTP/JSON routes with SSE change streams, and the binary.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use racetimer::{Config, ManualClock, TimingSystem};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let system = TimingSystem::builder(Config::default())
//!         .with_clock(Arc::new(ManualClock::new(0)))
//!         .build()?;
//!
//!     system.queue().insert(racetimer::RecordMetadata::for_car("7"), None).await?;
//!     system.observer().start(1_000, None).await?;
//!     let record = system.observer().stop(6_000, None, None).await?;
//!     assert_eq!(record.duration, 5_000);
//!     Ok(())
//! }
//! ```

/// Unix milliseconds.
pub type Timestamp = i64;

/// Signed milliseconds.
pub type Millis = i64;

mod clock;
mod config;
mod core;
mod error;
mod events;
mod manager;
mod metadata;
mod services;
mod subscribers;

pub mod client;
pub mod domain;
pub mod replay;

#[cfg(feature = "rpc")]
pub mod rpc;

// ---- Public re-exports ----

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CompetitionConfig, Config, MetadataConfig, RecordConfig, RuntimeConfig, ServerConfig,
    ServiceConfig, TrackConfig,
};
pub use core::{TimingSystem, TimingSystemBuilder};
pub use domain::{Competition, CompetitionCommand, DomainError};
pub use error::{RuntimeError, TimingError};
pub use events::{Bus, Event, EventKind};
pub use manager::{ServiceDescriptor, ServiceManager, ServiceState};
pub use metadata::{MetadataSchema, RecordMetadata, RecordStatus};
pub use replay::{Preview, Replayable, Replayer};
pub use services::{
    AggregatedChangeBroadcaster, FlipOutcome, MetadataRevision, ObserverSnapshot, PendingCar,
    PendingCarQueue, Record, Records, ReplayErrorView, RunningObserver, Subscription,
    TrackSnapshot,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};

pub use client::{BroadcasterSource, ChangePool, ChangeSource, PoolNotice, PooledSubscription};
