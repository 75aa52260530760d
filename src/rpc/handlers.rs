//! HTTP request handlers.
//!
//! Handlers are thin: decode the body, call the service, encode the result.
//! Malformed bodies become [`TimingError::Validation`] so every failure shares
//! the `{error, message}` body.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

use super::types::*;
use crate::{
    core::TimingSystem,
    error::TimingError,
    manager::ServiceDescriptor,
    services::{
        FlipOutcome, ObserverSnapshot, PendingCar, Record, ReplayErrorView, Subscription,
    },
    Timestamp,
};

/// Shared handler state.
#[derive(Clone)]
pub struct RpcState {
    pub system: Arc<TimingSystem>,
}

impl RpcState {
    pub fn new(system: Arc<TimingSystem>) -> Self {
        Self { system }
    }

    fn at(&self, ts: Option<Timestamp>) -> Timestamp {
        ts.unwrap_or_else(|| self.system.now())
    }
}

type ApiResult<T> = Result<Json<T>, TimingError>;
type SseStream = Sse<BoxStream<'static, Result<SseEvent, Infallible>>>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, TimingError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| TimingError::validation(e.body_text()))
}

// ═══════════════════════════════════════════════════════════════════════════
// Pending car queue
// ═══════════════════════════════════════════════════════════════════════════

/// `POST /pending-car-queue/insert`
pub async fn queue_insert(
    State(state): State<RpcState>,
    payload: Result<Json<QueueInsertRequest>, JsonRejection>,
) -> ApiResult<PendingCar> {
    let req = body(payload)?;
    let car = state.system.queue().insert(req.metadata, req.position).await?;
    Ok(Json(car))
}

/// `POST /pending-car-queue/insert-many`
pub async fn queue_insert_many(
    State(state): State<RpcState>,
    payload: Result<Json<QueueInsertManyRequest>, JsonRejection>,
) -> ApiResult<Vec<PendingCar>> {
    let req = body(payload)?;
    let cars = state
        .system
        .queue()
        .insert_many(req.items, req.position)
        .await?;
    Ok(Json(cars))
}

/// `POST /pending-car-queue/remove`
pub async fn queue_remove(
    State(state): State<RpcState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<PendingCar> {
    let req = body(payload)?;
    Ok(Json(state.system.queue().remove(&req.id).await?))
}

/// `POST /pending-car-queue/update`
pub async fn queue_update(
    State(state): State<RpcState>,
    payload: Result<Json<QueueUpdateRequest>, JsonRejection>,
) -> ApiResult<PendingCar> {
    let req = body(payload)?;
    Ok(Json(state.system.queue().update(&req.id, req.metadata).await?))
}

/// `POST /pending-car-queue/remove-all`
pub async fn queue_remove_all(State(state): State<RpcState>) -> Json<Vec<PendingCar>> {
    state.system.queue().remove_all().await;
    Json(Vec::new())
}

/// `POST /pending-car-queue/replace-all`
pub async fn queue_replace_all(
    State(state): State<RpcState>,
    payload: Result<Json<QueueReplaceAllRequest>, JsonRejection>,
) -> ApiResult<Vec<PendingCar>> {
    let req = body(payload)?;
    Ok(Json(state.system.queue().replace_all(req.items).await?))
}

/// `GET /pending-car-queue`
pub async fn queue_read_all(State(state): State<RpcState>) -> Json<Vec<PendingCar>> {
    Json(state.system.queue().read_all().await)
}

/// `GET /pending-car-queue/subscribe`
pub async fn queue_subscribe(State(state): State<RpcState>) -> SseStream {
    snapshots(&state, state.system.queue().subscribe_change())
}

// ═══════════════════════════════════════════════════════════════════════════
// Running observer
// ═══════════════════════════════════════════════════════════════════════════

/// `POST /running-observer/start`
pub async fn observer_start(
    State(state): State<RpcState>,
    payload: Result<Json<ObserverCommandRequest>, JsonRejection>,
) -> ApiResult<StartedResponse> {
    let req = body(payload)?;
    let car_id = state
        .system
        .observer()
        .start(state.at(req.timestamp), req.track.as_deref())
        .await?;
    Ok(Json(StartedResponse { car_id }))
}

/// `POST /running-observer/stop`
pub async fn observer_stop(
    State(state): State<RpcState>,
    payload: Result<Json<StopRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    let record = state
        .system
        .observer()
        .stop(
            state.at(req.timestamp),
            req.track.as_deref(),
            req.car_id.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

/// `POST /running-observer/flip`
pub async fn observer_flip(
    State(state): State<RpcState>,
    payload: Result<Json<ObserverCommandRequest>, JsonRejection>,
) -> ApiResult<FlipOutcome> {
    let req = body(payload)?;
    let outcome = state
        .system
        .observer()
        .flip_running_state(state.at(req.timestamp), req.track.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// `POST /running-observer/update-metadata`
pub async fn observer_update_metadata(
    State(state): State<RpcState>,
    payload: Result<Json<ObserverUpdateMetadataRequest>, JsonRejection>,
) -> ApiResult<ObserverSnapshot> {
    let req = body(payload)?;
    let observer = state.system.observer();
    observer
        .update_metadata(
            state.at(req.timestamp),
            req.track.as_deref(),
            &req.car_id,
            req.metadata,
        )
        .await?;
    Ok(Json(observer.read_all().await))
}

/// `POST /running-observer/set-time`
pub async fn observer_set_time(
    State(state): State<RpcState>,
    payload: Result<Json<SetTimeRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    let record = state
        .system
        .observer()
        .set_time(
            state.at(req.timestamp),
            req.track.as_deref(),
            &req.car_id,
            req.elapsed,
        )
        .await?;
    Ok(Json(record))
}

/// `GET /running-observer`
pub async fn observer_read_all(State(state): State<RpcState>) -> Json<ObserverSnapshot> {
    Json(state.system.observer().read_all().await)
}

/// `GET /running-observer/errors`
pub async fn observer_errors(State(state): State<RpcState>) -> Json<Vec<ReplayErrorView>> {
    Json(state.system.observer().replay_errors().await)
}

/// `GET /running-observer/subscribe`
pub async fn observer_subscribe(State(state): State<RpcState>) -> SseStream {
    snapshots(&state, state.system.observer().subscribe_change())
}

// ═══════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════

/// `POST /records/insert`
pub async fn records_insert(
    State(state): State<RpcState>,
    payload: Result<Json<RecordInsertRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    Ok(Json(
        state.system.records().insert(req.duration, req.metadata).await?,
    ))
}

/// `POST /records/update`
pub async fn records_update(
    State(state): State<RpcState>,
    payload: Result<Json<RecordUpdateRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    let record = state
        .system
        .records()
        .update(&req.id, req.duration, req.metadata)
        .await?;
    Ok(Json(record))
}

/// `POST /records/remove`
pub async fn records_remove(
    State(state): State<RpcState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    Ok(Json(state.system.records().remove(&req.id).await?))
}

/// `POST /records/recover`
pub async fn records_recover(
    State(state): State<RpcState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<Record> {
    let req = body(payload)?;
    Ok(Json(state.system.records().recover(&req.id).await?))
}

/// `POST /records/remove-all`
pub async fn records_remove_all(State(state): State<RpcState>) -> Json<RemovedResponse> {
    let removed = state.system.records().remove_all().await;
    Json(RemovedResponse { removed })
}

/// `GET /records?include_removed=`
pub async fn records_read_all(
    State(state): State<RpcState>,
    query: Result<Query<RecordsQuery>, QueryRejection>,
) -> ApiResult<Vec<Record>> {
    let Query(q) = query.map_err(|e| TimingError::validation(e.body_text()))?;
    Ok(Json(state.system.records().read_all(q.include_removed).await))
}

/// `GET /records/subscribe`
pub async fn records_subscribe(State(state): State<RpcState>) -> SseStream {
    snapshots(&state, state.system.records().subscribe_change())
}

// ═══════════════════════════════════════════════════════════════════════════
// Service manager
// ═══════════════════════════════════════════════════════════════════════════

/// `POST /service-manager/start`
pub async fn service_start(
    State(state): State<RpcState>,
    payload: Result<Json<ServiceStartRequest>, JsonRejection>,
) -> ApiResult<ServiceDescriptor> {
    let req = body(payload)?;
    Ok(Json(state.system.manager().start(&req.id, req.args).await?))
}

/// `POST /service-manager/stop`
pub async fn service_stop(
    State(state): State<RpcState>,
    payload: Result<Json<IdRequest>, JsonRejection>,
) -> ApiResult<ServiceDescriptor> {
    let req = body(payload)?;
    Ok(Json(state.system.manager().stop(&req.id).await?))
}

/// `GET /service-manager/status`
pub async fn service_status(State(state): State<RpcState>) -> Json<Vec<ServiceDescriptor>> {
    Json(state.system.manager().status().await)
}

// ═══════════════════════════════════════════════════════════════════════════
// Change streams
// ═══════════════════════════════════════════════════════════════════════════

/// `GET /changes/subscribe`: one empty `change` event per coalesced burst.
pub async fn changes_subscribe(State(state): State<RpcState>) -> SseStream {
    let events = state
        .system
        .broadcaster()
        .subscribe_change()
        .into_stream()
        .map(|item| {
            Ok(match item {
                Ok(()) => SseEvent::default().event("change").data(""),
                Err(e) => error_event(&e),
            })
        })
        .boxed();
    with_keep_alive(&state, events)
}

/// Current snapshot first, then one per change; ends with an `error` event.
fn snapshots<T>(state: &RpcState, sub: Subscription<T>) -> SseStream
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let first = sub.current();
    let events = stream::once(async move { Ok::<T, TimingError>(first) })
        .chain(sub.into_stream())
        .map(|item| {
            Ok(match item {
                Ok(snapshot) => SseEvent::default()
                    .event("snapshot")
                    .json_data(&snapshot)
                    .unwrap_or_else(|e| {
                        error_event(&TimingError::validation(format!("encode: {e}")))
                    }),
                Err(e) => error_event(&e),
            })
        })
        .boxed();
    with_keep_alive(state, events)
}

fn error_event(err: &TimingError) -> SseEvent {
    SseEvent::default()
        .event("error")
        .data(format!("{}: {}", err.as_label(), err.as_message()))
}

fn with_keep_alive(
    state: &RpcState,
    events: BoxStream<'static, Result<SseEvent, Infallible>>,
) -> SseStream {
    let sse = Sse::new(events);
    match state.system.config().keep_alive() {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)),
        None => sse,
    }
}
