use std::sync::Arc;

use super::system::TimingSystem;
use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    error::RuntimeError,
    subscribers::Subscribe,
};

/// Builder for a [`TimingSystem`].
pub struct TimingSystemBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    clock: Arc<dyn Clock>,
}

impl TimingSystemBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Bus event subscribers. Each gets its own worker and bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Time source for record timestamps and for commands sent without one.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and wires every service together. Must be
    /// called inside a tokio runtime; no external process is started here.
    pub fn build(self) -> Result<Arc<TimingSystem>, RuntimeError> {
        self.cfg.validate()?;
        let schema = self.cfg.metadata_schema()?;
        Ok(TimingSystem::new_internal(
            self.cfg,
            schema,
            self.subscribers,
            self.clock,
        ))
    }
}
