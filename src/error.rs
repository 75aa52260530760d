//! Error types used by the timing services and the runtime shell.
//!
//! This module defines two main error enums:
//!
//! - [`TimingError`]: errors returned synchronously by service commands
//!   (queue, observer, records, service manager, subscriptions).
//! - [`RuntimeError`]: errors raised by the runtime shell itself
//!   (configuration, I/O, shutdown grace).
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging and
//! for the error body of the RPC layer.

use std::time::Duration;
use thiserror::Error;

use crate::Timestamp;

/// # Errors produced by service commands.
///
/// None of these crash a service or corrupt an aggregate: a command that fails
/// simply did not apply.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// Malformed or out-of-range input (unknown track, index out of bounds, bad metadata).
    #[error("invalid input: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// The command violates a domain invariant (overwrap limit, pending car already set, ...).
    #[error("conflict: {reason}")]
    Conflict {
        /// Which invariant was violated.
        reason: String,
    },

    /// The command is older than a stop that was already promoted to records.
    #[error("stale command on track {track:?}: timestamp {timestamp} is before finalized horizon {horizon}")]
    StaleCommand {
        /// Track the command addressed.
        track: String,
        /// Timestamp carried by the rejected command.
        timestamp: Timestamp,
        /// Latest stop timestamp already promoted for that track.
        horizon: Timestamp,
    },

    /// Unknown record, queue entry or service id.
    #[error("{kind} {id:?} not found")]
    NotFound {
        /// Kind of entity that was looked up.
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Spawning or signalling a supervised process failed.
    #[error("process error for service {service:?}: {reason}")]
    Process {
        /// Service id.
        service: String,
        /// Underlying failure.
        reason: String,
    },

    /// A change stream terminated.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the stream ended.
        reason: String,
    },
}

impl TimingError {
    /// Shorthand for [`TimingError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        TimingError::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`TimingError::Conflict`].
    pub fn conflict(reason: impl Into<String>) -> Self {
        TimingError::Conflict {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`TimingError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        TimingError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for [`TimingError::ConnectionLost`].
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        TimingError::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs and RPC bodies.
    ///
    /// # Example
    /// ```
    /// use racetimer::TimingError;
    ///
    /// let err = TimingError::conflict("overwrap limit is 1");
    /// assert_eq!(err.as_label(), "conflict");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TimingError::Validation { .. } => "validation",
            TimingError::Conflict { .. } => "conflict",
            TimingError::StaleCommand { .. } => "stale_command",
            TimingError::NotFound { .. } => "not_found",
            TimingError::Process { .. } => "process",
            TimingError::ConnectionLost { .. } => "connection_lost",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TimingError::Validation { reason } => format!("validation: {reason}"),
            TimingError::Conflict { reason } => format!("conflict: {reason}"),
            TimingError::StaleCommand {
                track,
                timestamp,
                horizon,
            } => format!("stale: track={track} at={timestamp} horizon={horizon}"),
            TimingError::NotFound { kind, id } => format!("not found: {kind}={id}"),
            TimingError::Process { service, reason } => {
                format!("process: service={service} reason={reason}")
            }
            TimingError::ConnectionLost { reason } => format!("connection lost: {reason}"),
        }
    }

    /// Indicates whether the error was caused by the command itself
    /// (as opposed to the process environment or a stream).
    ///
    /// Command errors are returned to the caller and leave state untouched.
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            TimingError::Validation { .. }
                | TimingError::Conflict { .. }
                | TimingError::StaleCommand { .. }
                | TimingError::NotFound { .. }
        )
    }
}

/// # Errors produced by the runtime shell.
///
/// These represent failures outside of individual commands, such as a shutdown
/// sequence exceeding its grace period or an unreadable config file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some services did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of services that did not stop in time.
        stuck: Vec<String>,
    },

    /// Socket or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use racetimer::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Io(_) => "runtime_io",
            RuntimeError::Config { .. } => "runtime_config",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck services={stuck:?}")
            }
            RuntimeError::Io(e) => format!("io: {e}"),
            RuntimeError::Config { reason } => format!("config: {reason}"),
        }
    }
}
