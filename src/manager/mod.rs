//! Service manager: supervision of external helper processes.
//!
//! - [`ServiceManager`]: start/stop/status, default launches, graceful shutdown
//! - [`ServiceDescriptor`], [`ServiceState`]: pulled status snapshots
//! - `process`: spawn and per-launch exit watcher

mod descriptor;
#[allow(clippy::module_inception)]
mod manager;
mod process;

pub use descriptor::{ServiceDescriptor, ServiceState};
pub use manager::ServiceManager;
