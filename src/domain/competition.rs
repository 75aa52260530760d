use std::collections::BTreeMap;

use serde::Serialize;

use super::car::Car;
use super::error::DomainError;
use super::timer::Timer;
use super::track::Track;
use crate::config::CompetitionConfig;
use crate::metadata::RecordMetadata;
use crate::replay::Replayable;
use crate::{Millis, Timestamp};

/// Commands accepted by a [`Competition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompetitionCommand {
    /// Registers the car that starts next on `track`.
    RegisterPending {
        track: String,
        car: String,
        metadata: RecordMetadata,
    },
    /// Starts the pending car on `track`.
    Start { track: String },
    /// Stops `car` (or the FIFO head) on `track`.
    Stop { track: String, car: Option<String> },
    /// Replaces the metadata of a pending or running car.
    UpdateMetadata {
        track: String,
        car: String,
        metadata: RecordMetadata,
    },
    /// Corrects the elapsed time of a finished car.
    SetTime {
        track: String,
        car: String,
        elapsed: Millis,
    },
}

impl CompetitionCommand {
    /// Track the command addresses.
    pub fn track(&self) -> &str {
        match self {
            CompetitionCommand::RegisterPending { track, .. }
            | CompetitionCommand::Start { track }
            | CompetitionCommand::Stop { track, .. }
            | CompetitionCommand::UpdateMetadata { track, .. }
            | CompetitionCommand::SetTime { track, .. } => track,
        }
    }

    /// Car the command names explicitly, if any.
    pub fn car(&self) -> Option<&str> {
        match self {
            CompetitionCommand::RegisterPending { car, .. }
            | CompetitionCommand::UpdateMetadata { car, .. }
            | CompetitionCommand::SetTime { car, .. } => Some(car),
            CompetitionCommand::Stop { car, .. } => car.as_deref(),
            CompetitionCommand::Start { .. } => None,
        }
    }
}

/// Result of a successful [`CompetitionCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompetitionOutput {
    Registered,
    Started { car: String },
    Stopped(FinishedCar),
    MetadataUpdated,
    TimeSet(FinishedCar),
}

/// A car stopped by replay, awaiting promotion into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishedCar {
    pub track: String,
    pub car_id: String,
    pub metadata: RecordMetadata,
    pub started_at: Timestamp,
    pub stopped_at: Timestamp,
    pub elapsed: Millis,
}

/// The whole race state. Always derived by replay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Competition {
    tracks: BTreeMap<String, Track>,
    finished: Vec<FinishedCar>,
}

impl Competition {
    /// Empty competition with the given `(track id, overwrap limit)` pairs.
    pub fn with_tracks<I, S>(tracks: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self {
            tracks: tracks
                .into_iter()
                .map(|(id, limit)| (id.into(), Track::new(limit)))
                .collect(),
            finished: Vec::new(),
        }
    }

    /// Empty competition laid out per configuration.
    pub fn from_config(cfg: &CompetitionConfig) -> Self {
        Self::with_tracks(
            cfg.tracks
                .iter()
                .map(|(id, t)| (id.clone(), t.overwrap_limit)),
        )
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&String, &Track)> {
        self.tracks.iter()
    }

    /// Cars stopped so far, in stop order.
    pub fn finished(&self) -> &[FinishedCar] {
        &self.finished
    }

    fn track_mut(&mut self, id: &str) -> Result<&mut Track, DomainError> {
        self.tracks
            .get_mut(id)
            .ok_or_else(|| DomainError::NoSuchTrack {
                track: id.to_string(),
            })
    }
}

impl Replayable for Competition {
    type Order = Timestamp;
    type Command = CompetitionCommand;
    type Output = CompetitionOutput;
    type Error = DomainError;

    fn apply(
        &mut self,
        at: Timestamp,
        cmd: &CompetitionCommand,
    ) -> Result<CompetitionOutput, DomainError> {
        match cmd {
            CompetitionCommand::RegisterPending {
                track,
                car,
                metadata,
            } => {
                self.track_mut(track)?
                    .register_pending(Car::new(car.clone(), metadata.clone()))?;
                Ok(CompetitionOutput::Registered)
            }
            CompetitionCommand::Start { track } => {
                let car = self.track_mut(track)?.start(at)?;
                Ok(CompetitionOutput::Started { car })
            }
            CompetitionCommand::Stop { track, car } => {
                let stopped = self.track_mut(track)?.stop(at, car.as_deref())?;
                let finished = FinishedCar {
                    track: track.clone(),
                    car_id: stopped.car.id,
                    metadata: stopped.car.metadata,
                    started_at: stopped.started_at,
                    stopped_at: at,
                    elapsed: stopped.elapsed,
                };
                self.finished.push(finished.clone());
                Ok(CompetitionOutput::Stopped(finished))
            }
            CompetitionCommand::UpdateMetadata {
                track,
                car,
                metadata,
            } => {
                self.track_mut(track)?
                    .update_metadata(car, metadata.clone())?;
                Ok(CompetitionOutput::MetadataUpdated)
            }
            CompetitionCommand::SetTime {
                track,
                car,
                elapsed,
            } => {
                self.track_mut(track)?;
                let finished = self
                    .finished
                    .iter_mut()
                    .find(|f| f.track == *track && f.car_id == *car)
                    .ok_or_else(|| DomainError::CarNotFinished {
                        car_id: car.clone(),
                    })?;
                let mut timer = Timer::Stopped {
                    elapsed: finished.elapsed,
                };
                timer.set_time(*elapsed)?;
                finished.elapsed = *elapsed;
                Ok(CompetitionOutput::TimeSet(finished.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::Replayer;

    fn register(track: &str, car: &str) -> CompetitionCommand {
        CompetitionCommand::RegisterPending {
            track: track.into(),
            car: car.into(),
            metadata: RecordMetadata::for_car(car),
        }
    }

    fn start(track: &str) -> CompetitionCommand {
        CompetitionCommand::Start {
            track: track.into(),
        }
    }

    fn stop(track: &str) -> CompetitionCommand {
        CompetitionCommand::Stop {
            track: track.into(),
            car: None,
        }
    }

    fn replayer(limit: usize) -> Replayer<Competition> {
        Replayer::new(move || Competition::with_tracks([("main", limit)]))
    }

    #[test]
    fn test_unknown_track_is_validation_error() {
        let mut c = Competition::with_tracks([("main", 1)]);
        let err = c.apply(0, &start("side")).unwrap_err();
        assert_eq!(
            err,
            DomainError::NoSuchTrack {
                track: "side".into()
            }
        );
        assert_eq!(crate::TimingError::from(err).as_label(), "validation");
    }

    #[test]
    fn test_overwrap_one_scenario() {
        let mut r = replayer(1);
        r.emit(1_000, register("main", "a")).unwrap();
        r.emit(1_000, start("main")).unwrap();
        r.emit(2_000, register("main", "b")).unwrap();
        let err = r.emit(3_000, start("main")).unwrap_err();
        assert_eq!(err, DomainError::OverwrapLimitExceeded { limit: 1 });
        assert_eq!(crate::TimingError::from(err).as_label(), "conflict");

        match r.emit(6_000, stop("main")).unwrap() {
            CompetitionOutput::Stopped(f) => {
                assert_eq!(f.car_id, "a");
                assert_eq!(f.elapsed, 5_000);
            }
            other => panic!("unexpected output {other:?}"),
        }
        assert_eq!(r.state().finished().len(), 1);
        assert_eq!(r.state().track("main").unwrap().pending().unwrap().id, "b");
    }

    #[test]
    fn test_backdated_stop_lets_failed_start_succeed() {
        let mut r = replayer(1);
        r.emit(0, register("main", "a")).unwrap();
        r.emit(0, start("main")).unwrap();
        r.emit(10, register("main", "b")).unwrap();
        assert!(r.emit(20, start("main")).is_err());
        assert_eq!(r.errors().len(), 1);

        // The stop arrives late, stamped before b's start.
        r.emit(15, stop("main")).unwrap();
        assert!(r.errors().is_empty());
        let track = r.state().track("main").unwrap();
        assert_eq!(track.running().next().unwrap().id, "b");
        assert!(track.pending().is_none());
    }

    #[test]
    fn test_set_time_corrects_finished_car_only() {
        let mut r = replayer(1);
        r.emit(0, register("main", "a")).unwrap();
        r.emit(0, start("main")).unwrap();
        let set = |elapsed| CompetitionCommand::SetTime {
            track: "main".into(),
            car: "a".into(),
            elapsed,
        };
        assert_eq!(
            r.emit(10, set(5)).unwrap_err(),
            DomainError::CarNotFinished { car_id: "a".into() }
        );

        r.emit(100, stop("main")).unwrap();
        assert!(matches!(
            r.emit(200, set(-3)).unwrap_err(),
            DomainError::NegativeElapsed { elapsed: -3 }
        ));
        match r.emit(200, set(95)).unwrap() {
            CompetitionOutput::TimeSet(f) => assert_eq!(f.elapsed, 95),
            other => panic!("unexpected output {other:?}"),
        }
        assert_eq!(r.state().finished()[0].elapsed, 95);
        assert_eq!(r.state().finished()[0].stopped_at, 100);
    }

    #[test]
    fn test_backdated_start_rebuilds_identically() {
        let cmds = vec![
            (100, register("main", "a")),
            (300, start("main")),
            (900, stop("main")),
            (200, register("main", "b")),
        ];
        let mut live = replayer(2);
        for (at, cmd) in cmds {
            let _ = live.emit(at, cmd);
        }

        let mut fresh = Competition::with_tracks([("main", 2)]);
        for e in live.log() {
            let _ = fresh.apply(e.order, &e.command);
        }
        assert_eq!(&fresh, live.state());
    }
}
