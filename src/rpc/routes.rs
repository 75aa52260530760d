//! Route table.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::*;

/// Full router with every service mounted under its own prefix.
pub fn create_router(state: RpcState) -> Router {
    Router::new()
        .nest("/pending-car-queue", queue_routes())
        .nest("/running-observer", observer_routes())
        .nest("/records", records_routes())
        .nest("/service-manager", manager_routes())
        .route("/changes/subscribe", get(changes_subscribe))
        .with_state(state)
}

fn queue_routes() -> Router<RpcState> {
    Router::new()
        .route("/", get(queue_read_all))
        .route("/insert", post(queue_insert))
        .route("/insert-many", post(queue_insert_many))
        .route("/remove", post(queue_remove))
        .route("/update", post(queue_update))
        .route("/remove-all", post(queue_remove_all))
        .route("/replace-all", post(queue_replace_all))
        .route("/subscribe", get(queue_subscribe))
}

fn observer_routes() -> Router<RpcState> {
    Router::new()
        .route("/", get(observer_read_all))
        .route("/start", post(observer_start))
        .route("/stop", post(observer_stop))
        .route("/flip", post(observer_flip))
        .route("/update-metadata", post(observer_update_metadata))
        .route("/set-time", post(observer_set_time))
        .route("/errors", get(observer_errors))
        .route("/subscribe", get(observer_subscribe))
}

fn records_routes() -> Router<RpcState> {
    Router::new()
        .route("/", get(records_read_all))
        .route("/insert", post(records_insert))
        .route("/update", post(records_update))
        .route("/remove", post(records_remove))
        .route("/recover", post(records_recover))
        .route("/remove-all", post(records_remove_all))
        .route("/subscribe", get(records_subscribe))
}

fn manager_routes() -> Router<RpcState> {
    Router::new()
        .route("/start", post(service_start))
        .route("/stop", post(service_stop))
        .route("/status", get(service_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::core::TimingSystem;
    use crate::rpc::types::ErrorBody;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let system = TimingSystem::builder(Config::default())
            .with_clock(Arc::new(ManualClock::new(10_000)))
            .build()
            .unwrap();
        create_router(RpcState::new(system))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_start_stop_over_http() {
        let app = app();
        let (status, car) = call(
            &app,
            "POST",
            "/pending-car-queue/insert",
            Some(json!({"metadata": {"carId": "12", "pylonTouchCount": 0, "derailmentCount": 0}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, started) = call(
            &app,
            "POST",
            "/running-observer/start",
            Some(json!({"timestamp": 1_000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["car_id"], car["id"]);

        let (status, record) = call(
            &app,
            "POST",
            "/running-observer/stop",
            Some(json!({"timestamp": 4_500})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["duration"], 3_500);
        assert_eq!(record["metadata"]["carId"], "12");

        let (_, records) = call(&app, "GET", "/records", None).await;
        assert_eq!(records.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_stale_command_is_conflict() {
        let app = app();
        call(&app, "POST", "/running-observer/start", Some(json!({"timestamp": 1_000}))).await;
        call(&app, "POST", "/running-observer/stop", Some(json!({"timestamp": 2_000}))).await;

        let (status, body) = call(
            &app,
            "POST",
            "/running-observer/stop",
            Some(json!({"timestamp": 1_500})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let body: ErrorBody = serde_json::from_value(body).unwrap();
        assert_eq!(body.error, "stale_command");

        let (status, body) = call(
            &app,
            "POST",
            "/running-observer/start",
            Some(json!({"timestamp": 1_500})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn test_set_time_corrects_record() {
        let app = app();
        let (_, started) = call(&app, "POST", "/running-observer/start", Some(json!({"timestamp": 0}))).await;
        let (_, record) = call(&app, "POST", "/running-observer/stop", Some(json!({"timestamp": 700}))).await;
        assert_eq!(record["duration"], 700);

        let (status, corrected) = call(
            &app,
            "POST",
            "/running-observer/set-time",
            Some(json!({"timestamp": 800, "car_id": started["car_id"], "elapsed": 690})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(corrected["id"], record["id"]);
        assert_eq!(corrected["duration"], 690);

        let (status, body) = call(
            &app,
            "POST",
            "/running-observer/set-time",
            Some(json!({"timestamp": 900, "car_id": "nobody", "elapsed": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn test_malformed_metadata_is_bad_request() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/pending-car-queue/insert",
            Some(json!({"metadata": {"carId": 12}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn test_removed_records_hidden_unless_requested() {
        let app = app();
        let (_, rec) = call(
            &app,
            "POST",
            "/records/insert",
            Some(json!({
                "duration": 900,
                "metadata": {"carId": "3", "pylonTouchCount": 1, "derailmentCount": 0}
            })),
        )
        .await;
        let (status, _) = call(&app, "POST", "/records/remove", Some(json!({"id": rec["id"]}))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, visible) = call(&app, "GET", "/records", None).await;
        assert_eq!(visible.as_array().map(Vec::len), Some(0));
        let (_, all) = call(&app, "GET", "/records?include_removed=true", None).await;
        assert_eq!(all.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/service-manager/start",
            Some(json!({"id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, list) = call(&app, "GET", "/service-manager/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list, json!([]));
    }
}
