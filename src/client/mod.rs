//! Client-side helpers for consuming change notifications.
//!
//! - [`ChangePool`]: one shared upstream per source, reference counted
//! - [`ChangeSource`]: where the upstream comes from
//! - [`BroadcasterSource`]: in-process source backed by [`AggregatedChangeBroadcaster`]

mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::error::TimingError;
use crate::services::AggregatedChangeBroadcaster;

pub use pool::{ChangePool, ChangeSource, PoolNotice, PooledSubscription};

/// Change source reading the local aggregated broadcaster.
#[derive(Clone)]
pub struct BroadcasterSource {
    broadcaster: Arc<AggregatedChangeBroadcaster>,
}

impl BroadcasterSource {
    pub fn new(broadcaster: Arc<AggregatedChangeBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl ChangeSource for BroadcasterSource {
    async fn connect(&self) -> Result<BoxStream<'static, Result<(), TimingError>>, TimingError> {
        Ok(self.broadcaster.subscribe_change().into_stream().boxed())
    }
}
