//! # Record metadata: the JSON contract shared with the GUI and exporters.
//!
//! ```text
//! {
//!   "carId": "12",
//!   "pylonTouchCount": 0,
//!   "derailmentCount": 1,
//!   "status": "DNF",          // optional: "DNS" | "MC" | "DNF"
//!   "removed": false,
//!   "heat": "A"               // optional
//! }
//! ```
//!
//! The shape is enforced by typed deserialization: a value that does not fit
//! [`RecordMetadata`] is rejected with [`TimingError::Validation`]. On top of
//! that, `record.metadata.schema` in the configuration may hold a JSON Schema
//! (see [`MetadataSchema`]) that every queued, running and recorded value must
//! satisfy.

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};

use crate::error::TimingError;

/// Outcome flag attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Did not start.
    #[serde(rename = "DNS")]
    Dns,
    /// Missed course.
    #[serde(rename = "MC")]
    Mc,
    /// Did not finish.
    #[serde(rename = "DNF")]
    Dnf,
}

/// Scoring metadata carried by a car from the queue into its record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    /// Bib / entry number shown to operators.
    pub car_id: String,
    /// Penalty counter: pylons touched.
    pub pylon_touch_count: u32,
    /// Penalty counter: derailments.
    pub derailment_count: u32,
    /// Optional outcome flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    /// Logical deletion marker.
    #[serde(default)]
    pub removed: bool,
    /// Optional heat label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heat: Option<String>,
}

impl RecordMetadata {
    /// Metadata for a bib with zeroed counters.
    pub fn for_car(car_id: impl Into<String>) -> Self {
        Self {
            car_id: car_id.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with `status` replaced.
    pub fn with_status(mut self, status: Option<RecordStatus>) -> Self {
        self.status = status;
        self
    }

    /// Returns a copy with `removed` replaced.
    pub fn with_removed(mut self, removed: bool) -> Self {
        self.removed = removed;
        self
    }
}

/// Compiled `record.metadata.schema`. The default accepts everything.
#[derive(Clone, Default)]
pub struct MetadataSchema {
    validator: Option<Arc<Validator>>,
}

impl MetadataSchema {
    /// Compiles `schema`; `None` yields the accept-all schema.
    pub fn compile(schema: Option<&serde_json::Value>) -> Result<Self, String> {
        let validator = match schema {
            Some(schema) => Some(Arc::new(
                jsonschema::validator_for(schema).map_err(|e| e.to_string())?,
            )),
            None => None,
        };
        Ok(Self { validator })
    }

    /// Checks `metadata` as it would be written to the JSON contract.
    pub fn check(&self, metadata: &RecordMetadata) -> Result<(), TimingError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let value = serde_json::to_value(metadata)
            .map_err(|e| TimingError::validation(format!("metadata: {e}")))?;
        validator.validate(&value).map_err(|e| {
            TimingError::validation(format!(
                "metadata for car {:?} does not match schema: {e}",
                metadata.car_id
            ))
        })
    }

    /// Checks every item of a batch before anything is applied.
    pub fn check_all<'a, I>(&self, items: I) -> Result<(), TimingError>
    where
        I: IntoIterator<Item = &'a RecordMetadata>,
    {
        items.into_iter().try_for_each(|m| self.check(m))
    }
}

impl fmt::Debug for MetadataSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSchema")
            .field("configured", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> Result<RecordMetadata, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[test]
    fn test_parses_full_document() {
        let meta = parse(
            r#"{"carId":"12","pylonTouchCount":2,"derailmentCount":1,"status":"DNF","removed":false,"heat":"B"}"#,
        )
        .unwrap();
        assert_eq!(meta.car_id, "12");
        assert_eq!(meta.pylon_touch_count, 2);
        assert_eq!(meta.status, Some(RecordStatus::Dnf));
        assert_eq!(meta.heat.as_deref(), Some("B"));
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let meta = parse(
            r#"{"carId":"3","pylonTouchCount":0,"derailmentCount":0,"removed":true}"#,
        )
        .unwrap();
        assert!(meta.removed);
        assert_eq!(meta.status, None);
        let written = serde_json::to_value(&meta).unwrap();
        assert!(written.get("status").is_none());
        assert!(written.get("heat").is_none());
    }

    #[test]
    fn test_rejects_missing_required_and_bad_values() {
        assert!(parse(r#"{"carId":"3"}"#).is_err());

        let negative = parse(
            r#"{"carId":"3","pylonTouchCount":-1,"derailmentCount":0,"removed":false}"#,
        );
        assert!(negative.is_err());

        let bad_status = parse(
            r#"{"carId":"3","pylonTouchCount":0,"derailmentCount":0,"removed":false,"status":"OK"}"#,
        );
        assert!(bad_status.is_err());
    }

    #[test]
    fn test_configured_schema_restricts_values() {
        let schema = json!({
            "type": "object",
            "properties": {
                "carId": { "type": "string", "pattern": "^[0-9]+$" },
                "pylonTouchCount": { "maximum": 5 }
            }
        });
        let schema = MetadataSchema::compile(Some(&schema)).unwrap();

        schema.check(&RecordMetadata::for_car("12")).unwrap();
        let err = schema.check(&RecordMetadata::for_car("x1")).unwrap_err();
        assert_eq!(err.as_label(), "validation");

        let mut touched = RecordMetadata::for_car("4");
        touched.pylon_touch_count = 9;
        assert!(schema.check(&touched).is_err());
        assert!(schema
            .check_all([&RecordMetadata::for_car("1"), &touched])
            .is_err());
    }

    #[test]
    fn test_missing_schema_accepts_everything_and_bad_schema_fails() {
        MetadataSchema::default()
            .check(&RecordMetadata::for_car("anything"))
            .unwrap();
        assert!(MetadataSchema::compile(Some(&json!({ "type": 12 }))).is_err());
    }
}
