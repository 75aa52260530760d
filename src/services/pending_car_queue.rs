//! # Pending car queue.
//!
//! Ordered list of cars waiting to start. The [`RunningObserver`](super::RunningObserver)
//! pops the head when a track needs a pending car.
//!
//! ## Rules
//! - Positions are indexes into the current list; `position > len` is a
//!   validation error.
//! - Batch operations validate everything before touching the list.
//! - Every metadata value must pass the configured [`MetadataSchema`].
//! - Every mutation replaces the watch snapshot and publishes
//!   `PendingCarQueueChanged`.

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::subscription::Subscription;
use crate::error::TimingError;
use crate::events::{Bus, Event, EventKind};
use crate::metadata::{MetadataSchema, RecordMetadata};

/// One queued car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCar {
    /// Queue entry id (uuid v4). Becomes the car id on the track.
    pub id: String,
    pub metadata: RecordMetadata,
}

impl PendingCar {
    /// New entry with a fresh id.
    pub fn new(metadata: RecordMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metadata,
        }
    }
}

/// FIFO of cars waiting to start.
pub struct PendingCarQueue {
    items: RwLock<Vec<PendingCar>>,
    schema: MetadataSchema,
    tx: watch::Sender<Vec<PendingCar>>,
    bus: Bus,
}

impl PendingCarQueue {
    pub fn new(bus: Bus) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            items: RwLock::new(Vec::new()),
            schema: MetadataSchema::default(),
            tx,
            bus,
        }
    }

    /// Validates every inserted or updated value against `schema`.
    pub fn with_schema(mut self, schema: MetadataSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Appends, or inserts at `position`.
    pub async fn insert(
        &self,
        metadata: RecordMetadata,
        position: Option<usize>,
    ) -> Result<PendingCar, TimingError> {
        self.schema.check(&metadata)?;
        let mut items = self.items.write().await;
        let at = check_position(position, items.len())?;
        let car = PendingCar::new(metadata);
        items.insert(at, car.clone());
        self.changed(&items, "insert");
        Ok(car)
    }

    /// Inserts a batch at `position` (or the end), preserving batch order.
    pub async fn insert_many(
        &self,
        metadata: Vec<RecordMetadata>,
        position: Option<usize>,
    ) -> Result<Vec<PendingCar>, TimingError> {
        self.schema.check_all(&metadata)?;
        let mut items = self.items.write().await;
        let at = check_position(position, items.len())?;
        let cars: Vec<PendingCar> = metadata.into_iter().map(PendingCar::new).collect();
        items.splice(at..at, cars.iter().cloned());
        self.changed(&items, "insert_many");
        Ok(cars)
    }

    pub async fn remove(&self, id: &str) -> Result<PendingCar, TimingError> {
        let mut items = self.items.write().await;
        let idx = find(&items, id)?;
        let car = items.remove(idx);
        self.changed(&items, "remove");
        Ok(car)
    }

    /// Replaces an entry's metadata, keeping its id and position.
    pub async fn update(
        &self,
        id: &str,
        metadata: RecordMetadata,
    ) -> Result<PendingCar, TimingError> {
        self.schema.check(&metadata)?;
        let mut items = self.items.write().await;
        let idx = find(&items, id)?;
        items[idx].metadata = metadata;
        let car = items[idx].clone();
        self.changed(&items, "update");
        Ok(car)
    }

    pub async fn remove_all(&self) {
        let mut items = self.items.write().await;
        items.clear();
        self.changed(&items, "remove_all");
    }

    /// Replaces the whole queue with fresh entries.
    pub async fn replace_all(
        &self,
        metadata: Vec<RecordMetadata>,
    ) -> Result<Vec<PendingCar>, TimingError> {
        self.schema.check_all(&metadata)?;
        let mut items = self.items.write().await;
        *items = metadata.into_iter().map(PendingCar::new).collect();
        let cars = items.clone();
        self.changed(&items, "replace_all");
        Ok(cars)
    }

    pub async fn read_all(&self) -> Vec<PendingCar> {
        self.items.read().await.clone()
    }

    /// Pops the head, if any.
    pub async fn consume_next(&self) -> Option<PendingCar> {
        let mut items = self.items.write().await;
        if items.is_empty() {
            return None;
        }
        let car = items.remove(0);
        self.changed(&items, "consume_next");
        Some(car)
    }

    /// Puts a consumed car back at the head.
    pub(crate) async fn restore_front(&self, car: PendingCar) {
        let mut items = self.items.write().await;
        items.insert(0, car);
        self.changed(&items, "restore_front");
    }

    /// Snapshots of the full list, one per mutation (coalesced if slow).
    pub fn subscribe_change(&self) -> Subscription<Vec<PendingCar>> {
        Subscription::new(self.tx.subscribe(), "pending car queue")
    }

    fn changed(&self, items: &[PendingCar], op: &'static str) {
        debug!(op, len = items.len(), "pending car queue changed");
        self.tx.send_replace(items.to_vec());
        self.bus
            .publish(Event::new(EventKind::PendingCarQueueChanged).with_reason(op));
    }
}

fn check_position(position: Option<usize>, len: usize) -> Result<usize, TimingError> {
    match position {
        None => Ok(len),
        Some(p) if p <= len => Ok(p),
        Some(p) => Err(TimingError::validation(format!(
            "position {p} is out of range (queue length {len})"
        ))),
    }
}

fn find(items: &[PendingCar], id: &str) -> Result<usize, TimingError> {
    items
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| TimingError::not_found("pending car", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> RecordMetadata {
        RecordMetadata::for_car(id)
    }

    fn car_ids(items: &[PendingCar]) -> Vec<String> {
        items.iter().map(|c| c.metadata.car_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_insert_at_position_and_bounds() {
        let q = PendingCarQueue::new(Bus::new(16));
        q.insert(meta("1"), None).await.unwrap();
        q.insert(meta("3"), None).await.unwrap();
        q.insert(meta("2"), Some(1)).await.unwrap();
        q.insert(meta("4"), Some(3)).await.unwrap();
        assert_eq!(car_ids(&q.read_all().await), vec!["1", "2", "3", "4"]);

        let err = q.insert(meta("x"), Some(9)).await.unwrap_err();
        assert_eq!(err.as_label(), "validation");
        assert_eq!(q.read_all().await.len(), 4);
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let q = PendingCarQueue::new(Bus::new(16));
        q.insert(meta("1"), None).await.unwrap();
        assert!(q
            .insert_many(vec![meta("a"), meta("b")], Some(5))
            .await
            .is_err());
        assert_eq!(q.read_all().await.len(), 1);

        q.insert_many(vec![meta("a"), meta("b")], Some(0))
            .await
            .unwrap();
        assert_eq!(car_ids(&q.read_all().await), vec!["a", "b", "1"]);
    }

    #[tokio::test]
    async fn test_update_remove_and_consume() {
        let q = PendingCarQueue::new(Bus::new(16));
        let a = q.insert(meta("1"), None).await.unwrap();
        let b = q.insert(meta("2"), None).await.unwrap();

        let updated = q.update(&b.id, meta("22")).await.unwrap();
        assert_eq!(updated.id, b.id);
        assert_eq!(q.remove("nope").await.unwrap_err().as_label(), "not_found");

        assert_eq!(q.consume_next().await.unwrap().id, a.id);
        q.remove(&b.id).await.unwrap();
        assert!(q.consume_next().await.is_none());
    }

    #[tokio::test]
    async fn test_replace_all_and_subscribe() {
        let bus = Bus::new(16);
        let mut events = bus.subscribe();
        let q = PendingCarQueue::new(bus);
        let mut sub = q.subscribe_change();

        q.insert(meta("1"), None).await.unwrap();
        q.replace_all(vec![meta("7"), meta("8")]).await.unwrap();
        let snapshot = sub.changed().await.unwrap();
        assert_eq!(car_ids(&snapshot), vec!["7", "8"]);

        q.remove_all().await;
        assert!(sub.changed().await.unwrap().is_empty());

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::PendingCarQueueChanged);
        assert_eq!(ev.reason.as_deref(), Some("insert"));
    }

    #[tokio::test]
    async fn test_schema_rejects_whole_batch() {
        let schema = serde_json::json!({ "properties": { "heat": { "enum": ["A", "B"] } } });
        let q = PendingCarQueue::new(Bus::new(16))
            .with_schema(MetadataSchema::compile(Some(&schema)).unwrap());
        let mut heat_c = meta("2");
        heat_c.heat = Some("C".into());

        let a = q.insert(meta("1"), None).await.unwrap();
        let err = q
            .insert_many(vec![meta("3"), heat_c.clone()], None)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "validation");
        assert!(q.replace_all(vec![heat_c.clone()]).await.is_err());
        assert!(q.update(&a.id, heat_c.clone()).await.is_err());
        assert!(q.insert(heat_c, Some(0)).await.is_err());
        assert_eq!(car_ids(&q.read_all().await), vec!["1"]);
    }
}
