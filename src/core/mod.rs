//! Runtime shell: wiring, run loop and shutdown.
//!
//! - [`TimingSystem`]: owns the bus, every service and the service manager
//! - [`TimingSystemBuilder`]: subscribers and clock injection
//! - `shutdown`: OS termination signals

mod builder;
mod shutdown;
mod system;

pub use builder::TimingSystemBuilder;
pub use system::TimingSystem;
