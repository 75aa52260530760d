//! # TimingSystem: owns the services and drives shutdown.
//!
//! ```text
//! build():
//!   cfg.validate(), compile record.metadata.schema
//!   Bus ─┬─► subscriber listener ─► SubscriberSet::emit(&Event)
//!        ├─► PendingCarQueue
//!        ├─► Records (clock)
//!        ├─► RunningObserver (queue, records)
//!        ├─► AggregatedChangeBroadcaster
//!        └─► ServiceManager (services config, grace)
//!
//! run():
//!   spawn_defaults() ─► wait_for_signal() ─► shutdown()
//!
//! shutdown():
//!   publish(ShutdownRequested) ─► runtime_token.cancel()
//!   manager.shutdown() within grace:
//!      ├─ Ok  ─► publish(AllStoppedWithin)
//!      └─ Err ─► publish(GraceExceeded), return RuntimeError::GraceExceeded
//!   drain subscriber listener, join subscriber workers
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{builder::TimingSystemBuilder, shutdown};
use crate::{
    client::{BroadcasterSource, ChangePool},
    clock::Clock,
    config::Config,
    error::RuntimeError,
    events::{Bus, Event, EventKind},
    manager::ServiceManager,
    metadata::MetadataSchema,
    services::{AggregatedChangeBroadcaster, PendingCarQueue, Records, RunningObserver},
    subscribers::{Subscribe, SubscriberSet},
    Timestamp,
};

/// All timing services wired to one bus.
pub struct TimingSystem {
    cfg: Config,
    clock: Arc<dyn Clock>,
    bus: Bus,
    queue: Arc<PendingCarQueue>,
    records: Arc<Records>,
    observer: Arc<RunningObserver>,
    broadcaster: Arc<AggregatedChangeBroadcaster>,
    manager: ServiceManager,
    runtime_token: CancellationToken,
    listener_stop: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl TimingSystem {
    /// Starts a builder with the given configuration.
    pub fn builder(cfg: Config) -> TimingSystemBuilder {
        TimingSystemBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        schema: MetadataSchema,
        subscribers: Vec<Arc<dyn Subscribe>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let runtime_token = CancellationToken::new();
        let listener_stop = CancellationToken::new();
        let subs = SubscriberSet::new(subscribers, bus.clone());
        let listener = subscriber_listener(&bus, subs, listener_stop.clone());

        let queue = Arc::new(PendingCarQueue::new(bus.clone()).with_schema(schema.clone()));
        let records =
            Arc::new(Records::new(Arc::clone(&clock), bus.clone()).with_schema(schema.clone()));
        let observer = Arc::new(
            RunningObserver::new(&cfg, Arc::clone(&queue), Arc::clone(&records), bus.clone())
                .with_schema(schema),
        );
        let broadcaster = Arc::new(AggregatedChangeBroadcaster::spawn(&bus));
        let manager = ServiceManager::new(&cfg.services, bus.clone(), cfg.grace());

        Arc::new(Self {
            cfg,
            clock,
            bus,
            queue,
            records,
            observer,
            broadcaster,
            manager,
            runtime_token,
            listener_stop,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn queue(&self) -> &Arc<PendingCarQueue> {
        &self.queue
    }

    pub fn records(&self) -> &Arc<Records> {
        &self.records
    }

    pub fn observer(&self) -> &Arc<RunningObserver> {
        &self.observer
    }

    pub fn broadcaster(&self) -> &Arc<AggregatedChangeBroadcaster> {
        &self.broadcaster
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    /// Current time per the configured clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// A fresh change pool over the local broadcaster.
    pub fn change_pool(&self) -> ChangePool<BroadcasterSource> {
        ChangePool::new(BroadcasterSource::new(Arc::clone(&self.broadcaster)))
    }

    /// Child token cancelled when shutdown begins. Servers use it to stop accepting.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.runtime_token.child_token()
    }

    /// Launches default services, waits for a termination signal, then shuts down.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        for (id, err) in self.manager.spawn_defaults().await {
            warn!(service = %id, err = %err, "service did not start");
        }

        tokio::select! {
            sig = shutdown::wait_for_signal() => {
                let sig = sig?;
                info!(signal = sig, "termination signal received");
            }
            _ = self.runtime_token.cancelled() => {}
        }
        self.shutdown().await
    }

    /// Stops every supervised process within the grace period. Idempotent.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();

        let res = self.manager.shutdown().await;
        match &res {
            Ok(()) => self.bus.publish(Event::new(EventKind::AllStoppedWithin)),
            Err(e) => self
                .bus
                .publish(Event::new(EventKind::GraceExceeded).with_reason(e.as_message())),
        }

        self.listener_stop.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        res
    }
}

/// Forwards bus events to the subscriber set until `stop` fires and the
/// backlog is drained, then waits for the subscriber workers.
fn subscriber_listener(bus: &Bus, subs: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let ev = tokio::select! {
                biased;
                ev = rx.recv() => ev,
                _ = stop.cancelled() => match rx.try_recv() {
                    Ok(ev) => Ok(ev),
                    Err(_) => break,
                },
            };
            match ev {
                Ok(ev) => subs.emit(&ev),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "subscriber listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        subs.shutdown().await;
    })
}
