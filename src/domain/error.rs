use thiserror::Error;

use crate::error::TimingError;
use crate::{Millis, Timestamp};

/// Domain invariant violations raised while applying a competition command.
///
/// Every variant leaves the state it was raised against unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// `start` on a running timer.
    #[error("timer already running")]
    TimerAlreadyRunning,

    /// `stop` on a timer that is not running.
    #[error("timer not running")]
    TimerNotRunning,

    /// `set_time` on a timer that has not been stopped.
    #[error("timer not stopped")]
    TimerNotStopped,

    /// A car is already registered to start next.
    #[error("a pending car is already registered")]
    PendingCarAlreadyRegistered,

    /// `start` with no pending car.
    #[error("no pending car registered")]
    NoPendingCar,

    /// `start` would exceed the track's overwrap limit.
    #[error("overwrap limit {limit} exceeded")]
    OverwrapLimitExceeded {
        /// The track's limit.
        limit: usize,
    },

    /// The named car is neither pending nor running on the track.
    #[error("car {car_id:?} is not on the track")]
    CarNotRunning {
        /// Car id from the command.
        car_id: String,
    },

    /// `stop` without an id while nobody is running.
    #[error("nobody is running")]
    NobodyRunning,

    /// `stop - start` does not fit in a millisecond count.
    #[error("elapsed time between {since} and {at} overflows")]
    TimeOverflow {
        /// Start timestamp.
        since: Timestamp,
        /// Stop timestamp.
        at: Timestamp,
    },

    /// `set_time` with a negative value.
    #[error("elapsed time {elapsed} is negative")]
    NegativeElapsed { elapsed: Millis },

    /// `set_time` naming a car that has not finished on the track.
    #[error("car {car_id:?} has not finished")]
    CarNotFinished { car_id: String },

    /// Unknown track id.
    #[error("no such track {track:?}")]
    NoSuchTrack {
        /// Track id from the command.
        track: String,
    },
}

impl From<DomainError> for TimingError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NoSuchTrack { .. }
            | DomainError::TimeOverflow { .. }
            | DomainError::NegativeElapsed { .. } => TimingError::validation(err.to_string()),
            other => TimingError::conflict(other.to_string()),
        }
    }
}
