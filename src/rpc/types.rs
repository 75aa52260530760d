//! JSON request and response bodies.
//!
//! Timestamps are optional on observer commands; a missing one means "now"
//! per the server clock.

use serde::{Deserialize, Serialize};

use crate::metadata::RecordMetadata;
use crate::{Millis, Timestamp};

// ---- Pending car queue ----

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInsertRequest {
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInsertManyRequest {
    pub items: Vec<RecordMetadata>,
    #[serde(default)]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueUpdateRequest {
    pub id: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueReplaceAllRequest {
    pub items: Vec<RecordMetadata>,
}

/// Body naming one entity by id (queue entry, record or service).
#[derive(Debug, Clone, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

// ---- Running observer ----

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObserverCommandRequest {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub car_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObserverUpdateMetadataRequest {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub track: Option<String>,
    pub car_id: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetTimeRequest {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub track: Option<String>,
    pub car_id: String,
    pub elapsed: Millis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartedResponse {
    pub car_id: String,
}

// ---- Records ----

#[derive(Debug, Clone, Deserialize)]
pub struct RecordInsertRequest {
    pub duration: Millis,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordUpdateRequest {
    pub id: String,
    #[serde(default)]
    pub duration: Option<Millis>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    pub include_removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedResponse {
    pub removed: usize,
}

// ---- Service manager ----

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStartRequest {
    pub id: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

// ---- Errors ----

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable snake_case label.
    pub error: String,
    pub message: String,
}
