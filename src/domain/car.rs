use serde::Serialize;

use super::timer::Timer;
use crate::metadata::RecordMetadata;

/// A car on a track: queue entry id, stopwatch and scoring metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Car {
    /// Queue entry id (uuid string).
    pub id: String,
    /// Stopwatch.
    pub timer: Timer,
    /// Metadata carried into the record when the car finishes.
    pub metadata: RecordMetadata,
}

impl Car {
    /// A car with a fresh timer.
    pub fn new(id: impl Into<String>, metadata: RecordMetadata) -> Self {
        Self {
            id: id.into(),
            timer: Timer::NotStarted,
            metadata,
        }
    }
}
