use std::collections::VecDeque;

use serde::Serialize;

use super::car::Car;
use super::error::DomainError;
use crate::metadata::RecordMetadata;
use crate::{Millis, Timestamp};

/// A car removed from a track by `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedCar {
    pub car: Car,
    pub started_at: Timestamp,
    pub elapsed: Millis,
}

/// One racing lane.
///
/// ## Rules
/// - `running.len() <= overwrap_limit` at all times
/// - at most one pending car
/// - every operation is atomic: on error the track is unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    overwrap_limit: usize,
    running: VecDeque<Car>,
    pending: Option<Car>,
}

impl Track {
    pub fn new(overwrap_limit: usize) -> Self {
        Self {
            overwrap_limit,
            running: VecDeque::new(),
            pending: None,
        }
    }

    /// Registers the car that starts next. Rejects if one is already pending.
    pub fn register_pending(&mut self, car: Car) -> Result<(), DomainError> {
        if self.pending.is_some() {
            return Err(DomainError::PendingCarAlreadyRegistered);
        }
        self.pending = Some(car);
        Ok(())
    }

    /// Starts the pending car at `at`, returning its id.
    pub fn start(&mut self, at: Timestamp) -> Result<String, DomainError> {
        if self.pending.is_none() {
            return Err(DomainError::NoPendingCar);
        }
        if self.running.len() >= self.overwrap_limit {
            return Err(DomainError::OverwrapLimitExceeded {
                limit: self.overwrap_limit,
            });
        }
        let mut car = match self.pending.take() {
            Some(car) => car,
            None => return Err(DomainError::NoPendingCar),
        };
        if let Err(e) = car.timer.start(at) {
            self.pending = Some(car);
            return Err(e);
        }
        let id = car.id.clone();
        self.running.push_back(car);
        Ok(id)
    }

    /// Stops `car_id`, or the FIFO head when `None`.
    pub fn stop(&mut self, at: Timestamp, car_id: Option<&str>) -> Result<StoppedCar, DomainError> {
        let idx = match car_id {
            Some(id) => self
                .running
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| DomainError::CarNotRunning {
                    car_id: id.to_string(),
                })?,
            None if self.running.is_empty() => return Err(DomainError::NobodyRunning),
            None => 0,
        };

        let started_at = self.running[idx]
            .timer
            .running_since()
            .ok_or(DomainError::TimerNotRunning)?;
        let elapsed = self.running[idx].timer.stop(at)?;
        let car = self
            .running
            .remove(idx)
            .ok_or(DomainError::NobodyRunning)?;
        Ok(StoppedCar {
            car,
            started_at,
            elapsed,
        })
    }

    /// Replaces the metadata of a pending or running car.
    pub fn update_metadata(
        &mut self,
        car_id: &str,
        metadata: RecordMetadata,
    ) -> Result<(), DomainError> {
        let car = self
            .pending
            .iter_mut()
            .chain(self.running.iter_mut())
            .find(|c| c.id == car_id)
            .ok_or_else(|| DomainError::CarNotRunning {
                car_id: car_id.to_string(),
            })?;
        car.metadata = metadata;
        Ok(())
    }

    pub fn overwrap_limit(&self) -> usize {
        self.overwrap_limit
    }

    /// Running cars, FIFO order (head started first).
    pub fn running(&self) -> impl Iterator<Item = &Car> {
        self.running.iter()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn pending(&self) -> Option<&Car> {
        self.pending.as_ref()
    }
}
