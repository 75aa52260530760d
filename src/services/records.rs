//! # Records store.
//!
//! Finalized, editable results. Records are never replayed: they are only
//! created by promotion from the running observer (or inserted by hand) and
//! then edited in place with a revision history.
//!
//! ## Rules
//! - Deletion is logical (`metadata.removed = true`); removed records stay
//!   editable and can be recovered.
//! - Every edit pushes the previous `(metadata, duration)` onto `history` and
//!   bumps `modified_at`.
//! - Inserted and edited metadata must pass the configured [`MetadataSchema`];
//!   a rejected edit leaves the record untouched.
//! - `read_all` ordering: removed records last; then car id ascending, numeric
//!   ids compared as numbers and placed before non-numeric ids; ties keep
//!   insertion order.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::subscription::Subscription;
use crate::clock::Clock;
use crate::error::TimingError;
use crate::events::{Bus, Event, EventKind};
use crate::metadata::{MetadataSchema, RecordMetadata, RecordStatus};
use crate::{Millis, Timestamp};

/// A previous state of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRevision {
    pub metadata: RecordMetadata,
    pub duration: Millis,
    /// When this state was replaced.
    pub replaced_at: Timestamp,
}

/// A finalized result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Record id (uuid v4).
    pub id: String,
    /// Elapsed milliseconds.
    pub duration: Millis,
    pub metadata: RecordMetadata,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    /// Older states, oldest first.
    pub history: Vec<MetadataRevision>,
}

impl Record {
    #[inline]
    pub fn car_id(&self) -> &str {
        &self.metadata.car_id
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.metadata.removed
    }

    fn revise(&mut self, duration: Millis, metadata: RecordMetadata, now: Timestamp) {
        self.history.push(MetadataRevision {
            metadata: std::mem::replace(&mut self.metadata, metadata),
            duration: self.duration,
            replaced_at: now,
        });
        self.duration = duration;
        self.modified_at = now;
    }
}

/// The records aggregate.
pub struct Records {
    items: RwLock<Vec<Record>>,
    schema: MetadataSchema,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Vec<Record>>,
    bus: Bus,
}

impl Records {
    pub fn new(clock: Arc<dyn Clock>, bus: Bus) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            items: RwLock::new(Vec::new()),
            schema: MetadataSchema::default(),
            clock,
            tx,
            bus,
        }
    }

    /// Validates inserted and edited metadata against `schema`.
    pub fn with_schema(mut self, schema: MetadataSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Creates a record stamped with the current time.
    pub async fn insert(
        &self,
        duration: Millis,
        metadata: RecordMetadata,
    ) -> Result<Record, TimingError> {
        self.schema.check(&metadata)?;
        Ok(self.append(duration, metadata, "insert").await)
    }

    /// Records a finished car. Its metadata was checked when the car was
    /// queued or edited on the track.
    pub(crate) async fn insert_finished(&self, duration: Millis, metadata: RecordMetadata) -> Record {
        self.append(duration, metadata, "promote").await
    }

    async fn append(&self, duration: Millis, metadata: RecordMetadata, op: &'static str) -> Record {
        let now = self.clock.now();
        let record = Record {
            id: Uuid::new_v4().to_string(),
            duration,
            metadata,
            created_at: now,
            modified_at: now,
            history: Vec::new(),
        };
        let mut items = self.items.write().await;
        items.push(record.clone());
        self.changed(&items, Some(&record.id), op);
        record
    }

    /// Replaces a record's metadata. Works on removed records too.
    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: RecordMetadata,
    ) -> Result<Record, TimingError> {
        self.edit(id, "update_metadata", |r| (r.duration, metadata))
            .await
    }

    /// Replaces metadata and, when given, corrects the duration.
    pub async fn update(
        &self,
        id: &str,
        duration: Option<Millis>,
        metadata: RecordMetadata,
    ) -> Result<Record, TimingError> {
        self.edit(id, "update", |r| (duration.unwrap_or(r.duration), metadata))
            .await
    }

    /// Corrects the duration, keeping the metadata.
    pub async fn set_duration(&self, id: &str, duration: Millis) -> Result<Record, TimingError> {
        self.edit(id, "set_duration", |r| (duration, r.metadata.clone()))
            .await
    }

    /// Sets or clears the outcome flag.
    pub async fn mark_status(
        &self,
        id: &str,
        status: Option<RecordStatus>,
    ) -> Result<Record, TimingError> {
        self.edit(id, "mark_status", |r| {
            (r.duration, r.metadata.clone().with_status(status))
        })
        .await
    }

    /// Logical delete.
    pub async fn remove(&self, id: &str) -> Result<Record, TimingError> {
        self.edit(id, "remove", |r| {
            (r.duration, r.metadata.clone().with_removed(true))
        })
        .await
    }

    /// Undoes a logical delete.
    pub async fn recover(&self, id: &str) -> Result<Record, TimingError> {
        self.edit(id, "recover", |r| {
            (r.duration, r.metadata.clone().with_removed(false))
        })
        .await
    }

    /// Logically deletes every record; returns how many were affected.
    pub async fn remove_all(&self) -> usize {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let mut affected = 0;
        for r in items.iter_mut().filter(|r| !r.is_removed()) {
            let metadata = r.metadata.clone().with_removed(true);
            r.revise(r.duration, metadata, now);
            affected += 1;
        }
        self.changed(&items, None, "remove_all");
        affected
    }

    /// Sorted snapshot; removed records only when `include_removed`.
    pub async fn read_all(&self, include_removed: bool) -> Vec<Record> {
        sorted(&self.items.read().await, include_removed)
    }

    /// Snapshots of `read_all(false)`, one per mutation (coalesced if slow).
    pub fn subscribe_change(&self) -> Subscription<Vec<Record>> {
        Subscription::new(self.tx.subscribe(), "records")
    }

    async fn edit<F>(&self, id: &str, op: &'static str, f: F) -> Result<Record, TimingError>
    where
        F: FnOnce(&Record) -> (Millis, RecordMetadata),
    {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        let record = items
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TimingError::not_found("record", id))?;
        let (duration, metadata) = f(record);
        self.schema.check(&metadata)?;
        record.revise(duration, metadata, now);
        let updated = record.clone();
        self.changed(&items, Some(id), op);
        Ok(updated)
    }

    fn changed(&self, items: &[Record], id: Option<&str>, op: &'static str) {
        debug!(op, record = id.unwrap_or("*"), "records changed");
        self.tx.send_replace(sorted(items, false));
        let mut ev = Event::new(EventKind::RecordsChanged).with_reason(op);
        if let Some(id) = id {
            ev = ev.with_source(id);
        }
        self.bus.publish(ev);
    }
}

fn sorted(items: &[Record], include_removed: bool) -> Vec<Record> {
    let mut out: Vec<Record> = items
        .iter()
        .filter(|r| include_removed || !r.is_removed())
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        a.is_removed()
            .cmp(&b.is_removed())
            .then_with(|| compare_car_ids(a.car_id(), b.car_id()))
    });
    out
}

/// Numeric ids compare numerically and sort before non-numeric ids.
fn compare_car_ids(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn records() -> (Records, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (Records::new(clock.clone(), Bus::new(16)), clock)
    }

    fn ids(rs: &[Record]) -> Vec<&str> {
        rs.iter().map(|r| r.car_id()).collect()
    }

    #[tokio::test]
    async fn test_read_all_orders_by_car_id() {
        let (store, _) = records();
        for id in ["10", "b", "2", "a", "2"] {
            store.insert(100, RecordMetadata::for_car(id)).await.unwrap();
        }
        let all = store.read_all(false).await;
        assert_eq!(ids(&all), vec!["2", "2", "10", "a", "b"]);
        // Equal ids keep insertion order.
        assert!(all[0].created_at <= all[1].created_at);
    }

    #[tokio::test]
    async fn test_update_keeps_history_and_bumps_modified_at() {
        let (store, clock) = records();
        let r = store.insert(5_000, RecordMetadata::for_car("12")).await.unwrap();
        clock.advance(500);

        let updated = store
            .update(&r.id, Some(4_900), RecordMetadata::for_car("13"))
            .await
            .unwrap();
        assert_eq!(updated.duration, 4_900);
        assert_eq!(updated.modified_at, 1_500);
        assert_eq!(updated.created_at, 1_000);
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].metadata.car_id, "12");
        assert_eq!(updated.history[0].duration, 5_000);

        let flagged = store
            .mark_status(&r.id, Some(RecordStatus::Dnf))
            .await
            .unwrap();
        assert_eq!(flagged.metadata.status, Some(RecordStatus::Dnf));
        assert_eq!(flagged.duration, 4_900);

        let err = store
            .update_metadata("missing", RecordMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "not_found");
    }

    #[tokio::test]
    async fn test_removed_record_stays_editable_and_hidden() {
        let (store, _) = records();
        let r = store.insert(100, RecordMetadata::for_car("1")).await.unwrap();
        store.insert(200, RecordMetadata::for_car("2")).await.unwrap();
        store.remove(&r.id).await.unwrap();

        let edited = store
            .update_metadata(&r.id, RecordMetadata::for_car("1").with_removed(true))
            .await
            .unwrap();
        assert!(edited.is_removed());
        assert_eq!(ids(&store.read_all(false).await), vec!["2"]);
        assert_eq!(ids(&store.read_all(true).await), vec!["2", "1"]);

        store.recover(&r.id).await.unwrap();
        assert_eq!(ids(&store.read_all(false).await), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_remove_all_is_logical_and_pushes_snapshot() {
        let (store, _) = records();
        let mut sub = store.subscribe_change();
        store.insert(1, RecordMetadata::for_car("1")).await.unwrap();
        store.insert_finished(2, RecordMetadata::for_car("2")).await;
        assert_eq!(sub.changed().await.unwrap().len(), 2);

        assert_eq!(store.remove_all().await, 2);
        assert!(sub.changed().await.unwrap().is_empty());
        let all = store.read_all(true).await;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.history.len() == 1));
    }

    #[tokio::test]
    async fn test_schema_guards_inserts_and_edits() {
        let schema = serde_json::json!({ "properties": { "removed": { "const": false } } });
        let clock = Arc::new(ManualClock::new(0));
        let store = Records::new(clock, Bus::new(16))
            .with_schema(MetadataSchema::compile(Some(&schema)).unwrap());

        let r = store.insert(10, RecordMetadata::for_car("1")).await.unwrap();
        let err = store
            .insert(10, RecordMetadata::for_car("2").with_removed(true))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "validation");

        assert!(store.remove(&r.id).await.is_err());
        let kept = store.read_all(true).await;
        assert_eq!(kept.len(), 1);
        assert!(!kept[0].is_removed());
        assert!(kept[0].history.is_empty());
    }
}
