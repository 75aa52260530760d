use serde::Serialize;

use super::error::DomainError;
use crate::{Millis, Timestamp};

/// Stopwatch state.
///
/// ```text
/// NotStarted ──start(at)──► Running{since} ──stop(at)──► Stopped{elapsed}
///                                 ▲                            │
///                                 └─────────start(at)──────────┘
/// set_time(e): Stopped{_} ─► Stopped{e}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Timer {
    /// Never started.
    #[default]
    NotStarted,
    /// Running since a timestamp.
    Running {
        /// Start timestamp.
        since: Timestamp,
    },
    /// Stopped with a final elapsed time.
    Stopped {
        /// Elapsed milliseconds.
        elapsed: Millis,
    },
}

impl Timer {
    /// Starts the timer at `at`.
    pub fn start(&mut self, at: Timestamp) -> Result<(), DomainError> {
        if self.is_running() {
            return Err(DomainError::TimerAlreadyRunning);
        }
        *self = Timer::Running { since: at };
        Ok(())
    }

    /// Stops the timer at `at`, returning the elapsed time.
    pub fn stop(&mut self, at: Timestamp) -> Result<Millis, DomainError> {
        match *self {
            Timer::Running { since } => {
                let elapsed = at
                    .checked_sub(since)
                    .ok_or(DomainError::TimeOverflow { since, at })?;
                *self = Timer::Stopped { elapsed };
                Ok(elapsed)
            }
            _ => Err(DomainError::TimerNotRunning),
        }
    }

    /// Overrides the elapsed time of a stopped timer.
    pub fn set_time(&mut self, elapsed: Millis) -> Result<(), DomainError> {
        if elapsed < 0 {
            return Err(DomainError::NegativeElapsed { elapsed });
        }
        match self {
            Timer::Stopped { elapsed: e } => {
                *e = elapsed;
                Ok(())
            }
            _ => Err(DomainError::TimerNotStopped),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Timer::Running { .. })
    }

    /// Start timestamp while running.
    pub fn running_since(&self) -> Option<Timestamp> {
        match *self {
            Timer::Running { since } => Some(since),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_measures_elapsed() {
        let mut t = Timer::default();
        t.start(1_000).unwrap();
        assert_eq!(t.running_since(), Some(1_000));
        assert_eq!(t.stop(6_000), Ok(5_000));
        assert_eq!(t, Timer::Stopped { elapsed: 5_000 });
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let mut t = Timer::default();
        assert_eq!(t.stop(1), Err(DomainError::TimerNotRunning));
        assert_eq!(t.set_time(5), Err(DomainError::TimerNotStopped));
        assert_eq!(t, Timer::NotStarted);

        t.start(10).unwrap();
        assert_eq!(t.start(20), Err(DomainError::TimerAlreadyRunning));
        assert_eq!(t.set_time(5), Err(DomainError::TimerNotStopped));
        assert_eq!(t, Timer::Running { since: 10 });
    }

    #[test]
    fn test_set_time_on_stopped_timer() {
        let mut t = Timer::Stopped { elapsed: 100 };
        t.set_time(250).unwrap();
        assert_eq!(
            t.set_time(-1),
            Err(DomainError::NegativeElapsed { elapsed: -1 })
        );
        assert_eq!(t, Timer::Stopped { elapsed: 250 });
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut t = Timer::default();
        t.start(i64::MIN).unwrap();
        let err = t.stop(i64::MAX).unwrap_err();
        assert_eq!(
            err,
            DomainError::TimeOverflow {
                since: i64::MIN,
                at: i64::MAX
            }
        );
        assert_eq!(crate::TimingError::from(err).as_label(), "validation");
        assert!(t.is_running());
    }
}
