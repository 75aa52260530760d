//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   services ── publish(Event) ──► Bus ──► subscriber_listener
//!                                              │
//!                                              └──► SubscriberSet::emit(&Event)
//!                                                        │
//!                                                   ┌────┴────┬─────────┐
//!                                                   ▼         ▼         ▼
//!                                                LogWriter  Exporter  Custom
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
