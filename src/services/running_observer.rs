//! # Running observer.
//!
//! Owns the [`Replayer<Competition>`] and turns operator/sensor commands into
//! competition commands. After every emit it promotes newly finished cars into
//! [`Records`].
//!
//! ```text
//! start(ts, track?)
//!   ├─ track has no pending car?
//!   │     └─ queue.consume_next() or default car ─► RegisterPending@ts
//!   ├─ Start@ts
//!   ├─ backdated? dry-run both on the replayer:
//!   │     ├─ a promoted result would change ─► StaleCommand, car back to queue
//!   │     └─ Start would fail                ─► error, car back to queue
//!   ├─ emit RegisterPending, emit Start
//!   └─ promote ─► records.insert_finished(..) for each new FinishedCar, raise horizon
//!
//! stop(ts, track?, car?)            ─► guard ─► emit Stop@ts ─► promote ─► Record
//! set_time(ts, track?, car, ms)     ─► guard ─► emit SetTime@ts ─► record duration
//! flip(ts, track?)                  ─► stop if anyone runs, else start (one lock)
//! ```
//!
//! ## Rules
//! - **Lock order**: observer state, then queue, then records. Never reversed.
//! - **Finalized horizon**: per track, the latest promoted stop timestamp.
//!   A command stamped before it is dry-run first and rejected with
//!   `StaleCommand` only if a promoted car would end with a different result.
//! - A command naming a finalized car is a `Conflict`, except `set_time`,
//!   which exists to correct finalized results.
//! - Failed commands stay in the replay log; see [`RunningObserver::replay_errors`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::pending_car_queue::{PendingCar, PendingCarQueue};
use super::records::{Record, Records};
use super::subscription::Subscription;
use crate::config::Config;
use crate::domain::{Car, Competition, CompetitionCommand, CompetitionOutput, FinishedCar};
use crate::error::TimingError;
use crate::events::{Bus, Event, EventKind};
use crate::metadata::{MetadataSchema, RecordMetadata};
use crate::replay::Replayer;
use crate::{Millis, Timestamp};

/// One track as seen by displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSnapshot {
    pub id: String,
    pub overwrap_limit: usize,
    pub pending: Option<Car>,
    /// FIFO order, head first.
    pub running: Vec<Car>,
    /// Latest promoted stop timestamp.
    pub horizon: Option<Timestamp>,
}

/// Snapshot pushed on every observer change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObserverSnapshot {
    pub tracks: Vec<TrackSnapshot>,
    /// Commands in the replay log.
    pub log_len: usize,
    /// Failures from the latest replay.
    pub failures: usize,
}

/// One replay failure, rendered for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayErrorView {
    pub seq: u64,
    pub order: Timestamp,
    pub track: String,
    pub command: String,
    pub error: String,
}

/// Result of [`RunningObserver::flip_running_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlipOutcome {
    /// A car was started; carries its id.
    Started(String),
    /// The FIFO head was stopped.
    Stopped(Record),
}

/// A finished car as it was written to records.
struct Promotion {
    finished: FinishedCar,
    record_id: String,
}

struct ObserverState {
    replayer: Replayer<Competition>,
    /// Latest promoted stop per track.
    horizons: HashMap<String, Timestamp>,
    /// Finished car id -> promotion.
    promoted: HashMap<String, Promotion>,
}

impl ObserverState {
    /// Horizon of `track` when `ts` lies before it.
    fn horizon_after(&self, track: &str, ts: Timestamp) -> Option<Timestamp> {
        self.horizons.get(track).copied().filter(|&h| ts < h)
    }

    /// Fails with `StaleCommand` if `replayed` gives any promoted car on
    /// `track` other than `edited` a different result.
    fn check_outcomes(
        &self,
        track: &str,
        ts: Timestamp,
        horizon: Timestamp,
        replayed: &Competition,
        edited: Option<&str>,
    ) -> Result<(), TimingError> {
        let rewritten = self
            .promoted
            .iter()
            .filter(|(id, p)| p.finished.track == track && edited != Some(id.as_str()))
            .find(|(_, p)| !replayed.finished().contains(&p.finished));
        match rewritten {
            Some((car, p)) => {
                warn!(track, ts, horizon, car = %car, record = %p.record_id, "stale command rejected");
                Err(TimingError::StaleCommand {
                    track: track.to_string(),
                    timestamp: ts,
                    horizon,
                })
            }
            None => Ok(()),
        }
    }
}

/// The running observer service.
pub struct RunningObserver {
    state: RwLock<ObserverState>,
    queue: Arc<PendingCarQueue>,
    records: Arc<Records>,
    schema: MetadataSchema,
    default_track: Option<String>,
    default_metadata: RecordMetadata,
    tx: watch::Sender<ObserverSnapshot>,
    bus: Bus,
}

impl RunningObserver {
    /// Builds the observer with a competition laid out per `cfg`.
    pub fn new(cfg: &Config, queue: Arc<PendingCarQueue>, records: Arc<Records>, bus: Bus) -> Self {
        let layout = cfg.competition.clone();
        let replayer = Replayer::new(move || Competition::from_config(&layout));
        let snapshot = snapshot_of(&replayer, &HashMap::new());
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            state: RwLock::new(ObserverState {
                replayer,
                horizons: HashMap::new(),
                promoted: HashMap::new(),
            }),
            queue,
            records,
            schema: MetadataSchema::default(),
            default_track: cfg.default_track(),
            default_metadata: cfg.record.metadata.default.clone(),
            tx,
            bus,
        }
    }

    /// Validates metadata edits against `schema`.
    pub fn with_schema(mut self, schema: MetadataSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Starts the next car on `track`; returns the started car id.
    pub async fn start(&self, ts: Timestamp, track: Option<&str>) -> Result<String, TimingError> {
        let track = self.resolve_track(track)?;
        let mut state = self.state.write().await;
        self.start_locked(&mut state, ts, &track).await
    }

    /// Stops `car` (or the FIFO head) and returns the record created for it.
    pub async fn stop(
        &self,
        ts: Timestamp,
        track: Option<&str>,
        car: Option<&str>,
    ) -> Result<Record, TimingError> {
        let track = self.resolve_track(track)?;
        let mut state = self.state.write().await;
        self.stop_locked(&mut state, ts, &track, car).await
    }

    /// Stops the FIFO head if anyone is running, otherwise starts.
    pub async fn flip_running_state(
        &self,
        ts: Timestamp,
        track: Option<&str>,
    ) -> Result<FlipOutcome, TimingError> {
        let track = self.resolve_track(track)?;
        let mut state = self.state.write().await;
        let running = state
            .replayer
            .state()
            .track(&track)
            .is_some_and(|t| t.running_len() > 0);
        if running {
            self.stop_locked(&mut state, ts, &track, None)
                .await
                .map(FlipOutcome::Stopped)
        } else {
            self.start_locked(&mut state, ts, &track)
                .await
                .map(FlipOutcome::Started)
        }
    }

    /// Replaces the metadata of a pending or running car.
    pub async fn update_metadata(
        &self,
        ts: Timestamp,
        track: Option<&str>,
        car: &str,
        metadata: RecordMetadata,
    ) -> Result<(), TimingError> {
        self.schema.check(&metadata)?;
        let track = self.resolve_track(track)?;
        let mut state = self.state.write().await;
        let cmd = CompetitionCommand::UpdateMetadata {
            track,
            car: car.to_string(),
            metadata,
        };
        self.guarded_emit(&mut state, ts, cmd).await.map(|_| ())
    }

    /// Corrects the elapsed time of a finished car and of its record.
    pub async fn set_time(
        &self,
        ts: Timestamp,
        track: Option<&str>,
        car: &str,
        elapsed: Millis,
    ) -> Result<Record, TimingError> {
        let track = self.resolve_track(track)?;
        let mut state = self.state.write().await;
        let cmd = CompetitionCommand::SetTime {
            track,
            car: car.to_string(),
            elapsed,
        };
        let finished = match self.guarded_emit(&mut state, ts, cmd).await? {
            CompetitionOutput::TimeSet(finished) => finished,
            other => return Err(unexpected(other)),
        };
        let promotion = state
            .promoted
            .get_mut(car)
            .ok_or_else(|| TimingError::not_found("promoted car", car))?;
        promotion.finished = finished;
        info!(car, record = %promotion.record_id, elapsed, "finished time corrected");
        self.records.set_duration(&promotion.record_id, elapsed).await
    }

    /// Snapshot of every track.
    pub async fn read_all(&self) -> ObserverSnapshot {
        let state = self.state.read().await;
        snapshot_of(&state.replayer, &state.horizons)
    }

    /// Failures from the latest replay (or accumulated appends since).
    pub async fn replay_errors(&self) -> Vec<ReplayErrorView> {
        let state = self.state.read().await;
        state
            .replayer
            .errors()
            .iter()
            .map(|f| ReplayErrorView {
                seq: f.entry.seq,
                order: f.entry.order,
                track: f.entry.command.track().to_string(),
                command: format!("{:?}", f.entry.command),
                error: f.error.to_string(),
            })
            .collect()
    }

    pub fn subscribe_change(&self) -> Subscription<ObserverSnapshot> {
        Subscription::new(self.tx.subscribe(), "running observer")
    }

    fn resolve_track(&self, track: Option<&str>) -> Result<String, TimingError> {
        match track {
            Some(t) => Ok(t.to_string()),
            None => self.default_track.clone().ok_or_else(|| {
                TimingError::validation("no track given and no default track configured")
            }),
        }
    }

    async fn start_locked(
        &self,
        state: &mut ObserverState,
        ts: Timestamp,
        track: &str,
    ) -> Result<String, TimingError> {
        let live = state
            .replayer
            .state()
            .track(track)
            .ok_or_else(|| TimingError::validation(format!("no such track {track:?}")))?;
        let needs_car = live.pending().is_none();
        let limit = live.overwrap_limit();
        let full = live.running_len() >= limit;
        let backdated = state.replayer.last_order().is_some_and(|last| ts < last);
        if !backdated && needs_car && full {
            return Err(TimingError::conflict(format!(
                "overwrap limit {limit} reached on track {track:?}"
            )));
        }

        let car = if needs_car {
            Some(match self.queue.consume_next().await {
                Some(car) => (car, true),
                None => (PendingCar::new(self.default_metadata.clone()), false),
            })
        } else {
            None
        };
        let register = car.as_ref().map(|(car, _)| CompetitionCommand::RegisterPending {
            track: track.to_string(),
            car: car.id.clone(),
            metadata: car.metadata.clone(),
        });
        let start = CompetitionCommand::Start {
            track: track.to_string(),
        };

        if backdated {
            let trial = register
                .iter()
                .chain(std::iter::once(&start))
                .map(|cmd| (ts, cmd.clone()));
            let preview = state.replayer.preview(trial);
            let verdict = match state.horizon_after(track, ts) {
                Some(horizon) => state.check_outcomes(track, ts, horizon, &preview.state, None),
                None => Ok(()),
            }
            .and_then(|()| match preview.results.last() {
                Some(Err(e)) if register.is_some() => Err(e.clone().into()),
                _ => Ok(()),
            });
            if let Err(e) = verdict {
                debug!(track, ts, err = %e, "backdated start rejected before emit");
                if let Some((car, true)) = car {
                    self.queue.restore_front(car).await;
                }
                return Err(e);
            }
        }

        if let Some(register) = register {
            if let Err(e) = self.emit(state, ts, register).await {
                if let Some((car, true)) = car {
                    self.queue.restore_front(car).await;
                }
                return Err(e);
            }
        }

        match self.emit(state, ts, start).await? {
            CompetitionOutput::Started { car } => {
                info!(track, car = %car, ts, "car started");
                Ok(car)
            }
            other => Err(unexpected(other)),
        }
    }

    async fn stop_locked(
        &self,
        state: &mut ObserverState,
        ts: Timestamp,
        track: &str,
        car: Option<&str>,
    ) -> Result<Record, TimingError> {
        let cmd = CompetitionCommand::Stop {
            track: track.to_string(),
            car: car.map(str::to_string),
        };
        match self.guarded_emit(state, ts, cmd).await? {
            CompetitionOutput::Stopped(finished) => self.record_for(state, &finished).await,
            other => Err(unexpected(other)),
        }
    }

    async fn guarded_emit(
        &self,
        state: &mut ObserverState,
        ts: Timestamp,
        cmd: CompetitionCommand,
    ) -> Result<CompetitionOutput, TimingError> {
        let correction = matches!(cmd, CompetitionCommand::SetTime { .. });
        if let Some(car) = cmd.car().filter(|_| !correction) {
            if let Some(p) = state.promoted.get(car) {
                return Err(TimingError::conflict(format!(
                    "car {car:?} already finalized at {} as record {}; edit the record",
                    p.finished.stopped_at, p.record_id
                )));
            }
        }
        if let Some(horizon) = state.horizon_after(cmd.track(), ts) {
            let preview = state.replayer.preview([(ts, cmd.clone())]);
            let edited = cmd.car().filter(|_| correction);
            state.check_outcomes(cmd.track(), ts, horizon, &preview.state, edited)?;
        }
        self.emit(state, ts, cmd).await
    }

    async fn emit(
        &self,
        state: &mut ObserverState,
        ts: Timestamp,
        cmd: CompetitionCommand,
    ) -> Result<CompetitionOutput, TimingError> {
        let track = cmd.track().to_string();
        let op = op_name(&cmd);
        let rebuilds = state.replayer.rebuilds();
        let result = state.replayer.emit(ts, cmd);

        if state.replayer.rebuilds() != rebuilds {
            let failures = state.replayer.errors().len();
            warn!(track = %track, ts, failures, "backdated command, competition rebuilt");
            self.bus.publish(
                Event::new(EventKind::ReplayRewound)
                    .with_source(track.as_str())
                    .with_reason(failures.to_string()),
            );
        }

        self.promote(state).await;
        self.tx
            .send_replace(snapshot_of(&state.replayer, &state.horizons));
        self.bus.publish(
            Event::new(EventKind::RunningObserverChanged)
                .with_source(track.as_str())
                .with_reason(op),
        );

        result.map_err(|e| {
            debug!(track = %track, ts, op, err = %e, "command rejected");
            e.into()
        })
    }

    /// Inserts every not yet promoted finished car into records.
    async fn promote(&self, state: &mut ObserverState) {
        let fresh: Vec<FinishedCar> = state
            .replayer
            .state()
            .finished()
            .iter()
            .filter(|f| !state.promoted.contains_key(&f.car_id))
            .cloned()
            .collect();

        for f in fresh {
            let record = self
                .records
                .insert_finished(f.elapsed, f.metadata.clone())
                .await;
            info!(
                track = %f.track,
                car = %f.car_id,
                record = %record.id,
                duration = f.elapsed,
                "finished car promoted"
            );
            let horizon = state.horizons.entry(f.track.clone()).or_insert(f.stopped_at);
            *horizon = (*horizon).max(f.stopped_at);
            state.promoted.insert(
                f.car_id.clone(),
                Promotion {
                    finished: f,
                    record_id: record.id,
                },
            );
        }
    }

    async fn record_for(
        &self,
        state: &ObserverState,
        finished: &FinishedCar,
    ) -> Result<Record, TimingError> {
        let promotion = state
            .promoted
            .get(&finished.car_id)
            .ok_or_else(|| TimingError::not_found("promoted car", finished.car_id.as_str()))?;
        self.records
            .read_all(true)
            .await
            .into_iter()
            .find(|r| r.id == promotion.record_id)
            .ok_or_else(|| TimingError::not_found("record", promotion.record_id.as_str()))
    }
}

fn snapshot_of(
    replayer: &Replayer<Competition>,
    horizons: &HashMap<String, Timestamp>,
) -> ObserverSnapshot {
    ObserverSnapshot {
        tracks: replayer
            .state()
            .tracks()
            .map(|(id, t)| TrackSnapshot {
                id: id.clone(),
                overwrap_limit: t.overwrap_limit(),
                pending: t.pending().cloned(),
                running: t.running().cloned().collect(),
                horizon: horizons.get(id).copied(),
            })
            .collect(),
        log_len: replayer.log().len(),
        failures: replayer.errors().len(),
    }
}

fn op_name(cmd: &CompetitionCommand) -> &'static str {
    match cmd {
        CompetitionCommand::RegisterPending { .. } => "register_pending",
        CompetitionCommand::Start { .. } => "start",
        CompetitionCommand::Stop { .. } => "stop",
        CompetitionCommand::UpdateMetadata { .. } => "update_metadata",
        CompetitionCommand::SetTime { .. } => "set_time",
    }
}

fn unexpected(out: CompetitionOutput) -> TimingError {
    TimingError::conflict(format!("unexpected competition output {out:?}"))
}
