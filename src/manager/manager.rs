//! # Service manager: lifecycle of external processes.
//!
//! Launches and stops the helper programs of a race day (sensor bridge, VLC,
//! spreadsheet exporter) from configuration, and reports their state.
//!
//! ## Architecture
//! ```text
//! start(id, args?) ──► ops mutex ──► [running? stop + await] ──► Starting
//!                                      └─► process::spawn ─┬─ Err ─► NotRunning + ServiceFailed
//!                                                          └─ Ok  ─► Running  + ServiceStarted
//!                                                                    └─► watcher task (generation g)
//!
//! watcher(g) exits ──► on_exit(id, g) ──► generation still g? ──► NotRunning + last_exit
//!                                                                 ServiceStopped | ServiceExited
//! ```
//!
//! ## Rules
//! - The manager exclusively owns process handles (watcher task + cancel token).
//! - `start`/`stop`/`shutdown` are serialized by one async mutex.
//! - Each launch gets a new generation; a watcher from an older launch never
//!   overwrites the state of a newer one.
//! - No automatic restart: an exited service stays `not-running`.
//! - Registry locks are never held across an await on a process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::descriptor::{ServiceDescriptor, ServiceState};
use super::process::{self, ExitReport};
use crate::config::ServiceConfig;
use crate::error::{RuntimeError, TimingError};
use crate::events::{Bus, Event, EventKind};

/// Handle to a running launch.
struct Launch {
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

struct Entry {
    descriptor: ServiceDescriptor,
    generation: u64,
    launch: Option<Launch>,
}

struct Inner {
    services: RwLock<HashMap<String, Entry>>,
    ops: Mutex<()>,
    bus: Bus,
    grace: Duration,
}

/// Supervisor of configured external processes. Cheap to clone.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<Inner>,
}

impl ServiceManager {
    /// Registers every configured service as `not-running`.
    pub fn new(services: &BTreeMap<String, ServiceConfig>, bus: Bus, grace: Duration) -> Self {
        let services = services
            .iter()
            .map(|(id, cfg)| {
                (
                    id.clone(),
                    Entry {
                        descriptor: ServiceDescriptor::from_config(id, cfg),
                        generation: 0,
                        launch: None,
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                services: RwLock::new(services),
                ops: Mutex::new(()),
                bus,
                grace,
            }),
        }
    }

    /// Starts (or restarts) a service, optionally overriding its arguments.
    pub async fn start(
        &self,
        id: &str,
        override_args: Option<Vec<String>>,
    ) -> Result<ServiceDescriptor, TimingError> {
        let _ops = self.inner.ops.lock().await;

        let running = {
            let services = self.inner.services.read().await;
            let entry = services
                .get(id)
                .ok_or_else(|| TimingError::not_found("service", id))?;
            if override_args.is_some() && !entry.descriptor.allow_args_override {
                return Err(TimingError::validation(format!(
                    "service {id:?} does not allow argument override"
                )));
            }
            entry.launch.is_some()
        };

        if running {
            info!(service = id, "restarting");
            if let Err(e) = self.stop_locked(id).await {
                warn!(service = id, err = %e, "stop before restart failed");
            }
        }

        self.launch(id, override_args).await
    }

    /// Kills a running service and waits up to the grace period for it to exit.
    pub async fn stop(&self, id: &str) -> Result<ServiceDescriptor, TimingError> {
        let _ops = self.inner.ops.lock().await;
        self.stop_locked(id).await
    }

    /// Snapshot of every service, sorted by id.
    pub async fn status(&self) -> Vec<ServiceDescriptor> {
        let services = self.inner.services.read().await;
        let mut out: Vec<ServiceDescriptor> =
            services.values().map(|e| e.descriptor.clone()).collect();
        out.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Starts every service flagged `default_start`; returns the failures.
    pub async fn spawn_defaults(&self) -> Vec<(String, TimingError)> {
        let ids: Vec<String> = {
            let services = self.inner.services.read().await;
            let mut ids: Vec<String> = services
                .values()
                .filter(|e| e.descriptor.default_start)
                .map(|e| e.descriptor.id.clone())
                .collect();
            ids.sort_unstable();
            ids
        };

        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.start(&id, None).await {
                warn!(service = %id, err = %e, "default start failed");
                failures.push((id, e));
            }
        }
        failures
    }

    /// Stops every running service within the grace period.
    ///
    /// Returns [`RuntimeError::GraceExceeded`] listing services still alive.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let _ops = self.inner.ops.lock().await;

        let launches: Vec<(String, Launch)> = {
            let mut services = self.inner.services.write().await;
            services
                .iter_mut()
                .filter_map(|(id, e)| {
                    let launch = e.launch.take()?;
                    e.descriptor.state = ServiceState::Stopping;
                    Some((id.clone(), launch))
                })
                .collect()
        };

        for (id, launch) in &launches {
            self.inner
                .bus
                .publish(Event::new(EventKind::ServiceStopping).with_source(id.as_str()));
            launch.cancel.cancel();
        }

        let ids: Vec<String> = launches.iter().map(|(id, _)| id.clone()).collect();
        let watchers = launches.into_iter().map(|(_, l)| l.watcher);
        let _ = tokio::time::timeout(self.inner.grace, join_all(watchers)).await;

        let services = self.inner.services.read().await;
        let stuck: Vec<String> = ids
            .into_iter()
            .filter(|id| {
                services
                    .get(id)
                    .is_some_and(|e| e.descriptor.state != ServiceState::NotRunning)
            })
            .collect();

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::GraceExceeded {
                grace: self.inner.grace,
                stuck,
            })
        }
    }

    async fn launch(
        &self,
        id: &str,
        override_args: Option<Vec<String>>,
    ) -> Result<ServiceDescriptor, TimingError> {
        let mut services = self.inner.services.write().await;
        let entry = services
            .get_mut(id)
            .ok_or_else(|| TimingError::not_found("service", id))?;

        let args = override_args.unwrap_or_else(|| entry.descriptor.default_args.clone());
        entry.descriptor.current_args = args.clone();
        entry.descriptor.state = ServiceState::Starting;
        self.publish(EventKind::ServiceStarting, id, None);

        let child = match process::spawn(&entry.descriptor.program, &args) {
            Ok(child) => child,
            Err(e) => {
                entry.descriptor.state = ServiceState::NotRunning;
                entry.descriptor.pid = None;
                entry.descriptor.last_exit = Some(format!("spawn failed: {e}"));
                warn!(service = id, program = %entry.descriptor.program, err = %e, "spawn failed");
                self.publish(EventKind::ServiceFailed, id, Some(e.to_string()));
                return Err(TimingError::Process {
                    service: id.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        entry.generation += 1;
        let generation = entry.generation;
        let pid = child.id();
        let cancel = CancellationToken::new();

        let inner = Arc::clone(&self.inner);
        let service = id.to_string();
        let token = cancel.clone();
        let watcher = tokio::spawn(async move {
            let report = process::watch(&service, child, token).await;
            inner.on_exit(&service, generation, report).await;
        });

        entry.launch = Some(Launch { cancel, watcher });
        entry.descriptor.state = ServiceState::Running;
        entry.descriptor.pid = pid;
        info!(service = id, pid = ?pid, args = ?args, "service started");
        self.publish(
            EventKind::ServiceStarted,
            id,
            pid.map(|p| p.to_string()),
        );
        Ok(entry.descriptor.clone())
    }

    async fn stop_locked(&self, id: &str) -> Result<ServiceDescriptor, TimingError> {
        let launch = {
            let mut services = self.inner.services.write().await;
            let entry = services
                .get_mut(id)
                .ok_or_else(|| TimingError::not_found("service", id))?;
            let Some(launch) = entry.launch.take() else {
                return Err(TimingError::conflict(format!(
                    "service {id:?} is {}",
                    entry.descriptor.state.as_str()
                )));
            };
            entry.descriptor.state = ServiceState::Stopping;
            launch
        };
        self.publish(EventKind::ServiceStopping, id, None);

        launch.cancel.cancel();
        let mut watcher = launch.watcher;
        if tokio::time::timeout(self.inner.grace, &mut watcher)
            .await
            .is_err()
        {
            watcher.abort();
            let mut services = self.inner.services.write().await;
            if let Some(entry) = services.get_mut(id) {
                entry.descriptor.state = ServiceState::NotRunning;
                entry.descriptor.pid = None;
                entry.descriptor.last_exit = Some("did not exit within grace period".into());
            }
            return Err(TimingError::Process {
                service: id.to_string(),
                reason: format!("did not exit within {:?}", self.inner.grace),
            });
        }

        let services = self.inner.services.read().await;
        services
            .get(id)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| TimingError::not_found("service", id))
    }

    fn publish(&self, kind: EventKind, id: &str, reason: Option<String>) {
        self.inner.publish(kind, id, reason);
    }
}

impl Inner {
    async fn on_exit(&self, id: &str, generation: u64, report: ExitReport) {
        let mut services = self.services.write().await;
        let Some(entry) = services.get_mut(id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.launch = None;
        entry.descriptor.state = ServiceState::NotRunning;
        entry.descriptor.pid = None;
        entry.descriptor.last_exit = Some(report.status.clone());
        drop(services);

        let kind = if report.requested {
            info!(service = id, status = %report.status, "service stopped");
            EventKind::ServiceStopped
        } else {
            warn!(service = id, status = %report.status, "service exited");
            EventKind::ServiceExited
        };
        self.publish(kind, id, Some(report.status));
    }

    fn publish(&self, kind: EventKind, id: &str, reason: Option<String>) {
        let mut ev = Event::new(kind).with_source(id);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
    }
}
