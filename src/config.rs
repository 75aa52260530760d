//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the timing system,
//! loaded from a JSON document (see [`Config::from_json`]).
//!
//! ```text
//! {
//!   "server":      { "addr": "127.0.0.1:11000", "keep_alive_ms": 10000 },
//!   "runtime":     { "bus_capacity": 1024, "grace_ms": 5000 },
//!   "competition": { "tracks": { "main": { "overwrap_limit": 1 } }, "default_track": "main" },
//!   "record":      { "metadata": { "default": { "carId": "", ... }, "schema": { "type": "object" } } },
//!   "services":    { "sensor": { "program": "sensor-bridge", "default_args": ["--port", "COM3"] } }
//! }
//! ```
//!
//! Every section (and every field) may be omitted; defaults apply.
//!
//! ## Sentinel values
//! - `bus_capacity = 0` → clamped to 1
//! - `keep_alive_ms = 0` → keep-alive comments disabled
//! - `default_track` absent → the only configured track (if exactly one)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::metadata::{MetadataSchema, RecordMetadata};

/// Top-level configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Event bus and shutdown settings.
    pub runtime: RuntimeConfig,
    /// Track layout.
    pub competition: CompetitionConfig,
    /// Record defaults.
    pub record: RecordConfig,
    /// Supervised external processes, keyed by service id.
    pub services: BTreeMap<String, ServiceConfig>,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Interval between SSE keep-alive comments (`0` = disabled).
    pub keep_alive_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 11000)),
            keep_alive_ms: 10_000,
        }
    }
}

/// Event bus and shutdown settings.
///
/// ## Field semantics
/// - `bus_capacity`: broadcast ring buffer size; slow listeners past it see `Lagged`
/// - `grace_ms`: how long shutdown waits for supervised processes to exit
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
    /// Shutdown grace period in milliseconds.
    pub grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            grace_ms: 5_000,
        }
    }
}

/// Track layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitionConfig {
    /// Tracks keyed by id.
    pub tracks: BTreeMap<String, TrackConfig>,
    /// Track used when a command names none.
    pub default_track: Option<String>,
}

impl Default for CompetitionConfig {
    /// A single track `main` with overwrap limit 1.
    fn default() -> Self {
        let mut tracks = BTreeMap::new();
        tracks.insert("main".to_string(), TrackConfig::default());
        Self {
            tracks,
            default_track: None,
        }
    }
}

/// Per-track settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Maximum number of cars running concurrently.
    pub overwrap_limit: usize,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self { overwrap_limit: 1 }
    }
}

/// Record defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Metadata template.
    pub metadata: MetadataConfig,
}

/// Metadata template used for cars started from an empty queue, and the
/// schema every metadata value must satisfy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Default metadata value.
    pub default: RecordMetadata,
    /// JSON Schema checked against queued, running and recorded metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// One supervised external process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Executable path or name (resolved through `PATH`).
    pub program: String,
    /// Arguments used when no override is supplied.
    #[serde(default)]
    pub default_args: Vec<String>,
    /// Whether `start` may replace `default_args`.
    #[serde(default)]
    pub allow_args_override: bool,
    /// Whether the service is started with the system.
    #[serde(default)]
    pub default_start: bool,
}

impl Config {
    /// Parses a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, RuntimeError> {
        let cfg: Config = serde_json::from_str(raw).map_err(|e| RuntimeError::Config {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.competition.tracks.is_empty() {
            return Err(RuntimeError::Config {
                reason: "competition.tracks must not be empty".into(),
            });
        }
        if let Some(track) = &self.competition.default_track {
            if !self.competition.tracks.contains_key(track) {
                return Err(RuntimeError::Config {
                    reason: format!("default_track {track:?} is not a configured track"),
                });
            }
        }
        let schema = self.metadata_schema()?;
        schema
            .check(&self.record.metadata.default)
            .map_err(|e| RuntimeError::Config {
                reason: format!("record.metadata.default: {}", e.as_message()),
            })?;
        Ok(())
    }

    /// Compiles `record.metadata.schema`.
    pub fn metadata_schema(&self) -> Result<MetadataSchema, RuntimeError> {
        MetadataSchema::compile(self.record.metadata.schema.as_ref()).map_err(|reason| {
            RuntimeError::Config {
                reason: format!("record.metadata.schema: {reason}"),
            }
        })
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.runtime.bus_capacity.max(1)
    }

    /// Shutdown grace period.
    #[inline]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.runtime.grace_ms)
    }

    /// SSE keep-alive interval as an `Option`.
    ///
    /// - `None` → no keep-alive comments
    /// - `Some(d)` → one comment every `d`
    #[inline]
    pub fn keep_alive(&self) -> Option<Duration> {
        if self.server.keep_alive_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.server.keep_alive_ms))
        }
    }

    /// Track used when a command names none: the configured default, or the
    /// only track.
    pub fn default_track(&self) -> Option<String> {
        if let Some(track) = &self.competition.default_track {
            return Some(track.clone());
        }
        if self.competition.tracks.len() == 1 {
            return self.competition.tracks.keys().next().cloned();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.bus_capacity_clamped(), 1024);
        assert_eq!(cfg.default_track().as_deref(), Some("main"));
        assert_eq!(cfg.keep_alive(), Some(Duration::from_secs(10)));
        assert!(cfg.services.is_empty());
    }

    #[test]
    fn test_parses_services_and_tracks() {
        let cfg = Config::from_json(
            r#"{
                "runtime": { "bus_capacity": 0, "grace_ms": 250 },
                "server": { "addr": "0.0.0.0:9000", "keep_alive_ms": 0 },
                "competition": { "tracks": { "a": { "overwrap_limit": 2 }, "b": {} } },
                "services": { "vlc": { "program": "vlc", "default_args": ["--intf", "http"], "allow_args_override": true } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.grace(), Duration::from_millis(250));
        assert_eq!(cfg.keep_alive(), None);
        assert_eq!(cfg.competition.tracks["a"].overwrap_limit, 2);
        assert_eq!(cfg.competition.tracks["b"].overwrap_limit, 1);
        assert_eq!(cfg.default_track(), None);
        let vlc = &cfg.services["vlc"];
        assert!(vlc.allow_args_override);
        assert!(!vlc.default_start);
    }

    #[test]
    fn test_default_metadata_must_match_schema() {
        let schema = r#""schema": { "properties": { "carId": { "minLength": 1 } } }"#;
        let err = Config::from_json(&format!(r#"{{ "record": {{ "metadata": {{ {schema} }} }} }}"#))
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_config");

        let cfg = Config::from_json(&format!(
            r#"{{ "record": {{ "metadata": {{ {schema}, "default": {{ "carId": "0", "pylonTouchCount": 0, "derailmentCount": 0 }} }} }} }}"#
        ))
        .unwrap();
        assert!(cfg.record.metadata.schema.is_some());

        let bad = Config::from_json(r#"{ "record": { "metadata": { "schema": { "type": 7 } } } }"#)
            .unwrap_err();
        assert!(bad.as_message().contains("record.metadata.schema"));
    }

    #[test]
    fn test_rejects_unknown_default_track() {
        let err = Config::from_json(r#"{ "competition": { "tracks": { "a": {} }, "default_track": "z" } }"#)
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_config");
    }
}
