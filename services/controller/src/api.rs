//! HTTP control surface over the coordinator and its state store.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use medilearn_core::federated_learning::{AuditEntry, CycleRecord, RunConfig, Status};
use medilearn_core::FederatedLearningCoordinator;
use serde_json::{json, Value};
use tokio_stream::wrappers::IntervalStream;
use tracing::{info, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: FederatedLearningCoordinator,
    /// Push interval of `/stream`.
    pub stream_interval: Duration,
}

impl AppState {
    pub fn new(coordinator: FederatedLearningCoordinator, stream_interval: Duration) -> Self {
        Self { coordinator, stream_interval }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/start", post(start))
        .route("/status", get(status))
        .route("/history", get(history))
        .route("/global_model", get(global_model))
        .route("/audit_log", get(audit_log))
        .route("/config", get(get_config).put(update_config).post(update_config))
        .route("/nodes", get(nodes))
        .route("/reset", post(reset))
        .route("/stream", get(stream))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let c = &state.coordinator;
    Json(json!({
        "status": "ok",
        "service": "medilearn-controller",
        "running": c.is_running(),
        "phase": c.phase(),
        "phase_seconds": c.in_phase_for().as_secs(),
        "runs_finished": c.runs_finished(),
        "last_error": c.last_error(),
    }))
}

async fn ready() -> impl IntoResponse {
    let ready = medilearn_core::is_ready();
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(json!({"ready": ready})))
}

async fn start(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // the run continues in the background; dropping the handle detaches it
    let handle = state.coordinator.start().await?;
    info!(run_id = %handle.run_id, "start_accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "started",
            "run_id": handle.run_id,
            "cycle_count": handle.cycle_count,
            "nodes": handle.nodes,
        })),
    ))
}

async fn status(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    state
        .coordinator
        .status()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No training data yet. Start training first.".into()))
}

async fn history(State(state): State<AppState>) -> Result<Json<Vec<CycleRecord>>, ApiError> {
    Ok(Json(state.coordinator.history().await?))
}

async fn global_model(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let body = match state.coordinator.global_model().await? {
        Some(snapshot) => json!({"global_model": snapshot}),
        None => json!({"global_model": null, "message": "No global model yet"}),
    };
    Ok(Json(body))
}

async fn audit_log(State(state): State<AppState>) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(state.coordinator.audit_log().await?))
}

async fn get_config(State(state): State<AppState>) -> Result<Json<RunConfig>, ApiError> {
    Ok(Json(state.coordinator.run_config().await?))
}

async fn update_config(State(state): State<AppState>, Json(config): Json<RunConfig>) -> Result<Json<Value>, ApiError> {
    let config = state.coordinator.update_config(config).await.map_err(|e| {
        warn!(error = %e, "config_update_rejected");
        e
    })?;
    Ok(Json(json!({"status": "updated", "config": config})))
}

async fn nodes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let names = state.coordinator.run_config().await?.node_names();
    Ok(Json(json!({"count": names.len(), "nodes": names})))
}

async fn reset(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.coordinator.reset().await?;
    Ok(Json(json!({"status": "reset"})))
}

async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let body = medilearn_core::render_metrics()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let coordinator = state.coordinator.clone();
    let ticks = IntervalStream::new(tokio::time::interval(state.stream_interval));
    let events = ticks.then(move |_| {
        let coordinator = coordinator.clone();
        async move { Ok(status_event(&coordinator).await) }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// One full status snapshot. Read failures become an `error` event so the stream stays open.
async fn status_event(coordinator: &FederatedLearningCoordinator) -> Event {
    match coordinator.status().await {
        Ok(Some(status)) => match serde_json::to_string(&status) {
            Ok(data) => Event::default().event("status").data(data),
            Err(e) => Event::default().event("error").data(json!({"message": e.to_string()}).to_string()),
        },
        Ok(None) => Event::default()
            .event("status")
            .data(json!({"message": "no cycle completed yet", "cycles_completed": 0}).to_string()),
        Err(e) => {
            warn!(error = %e, "stream_status_read_failed");
            Event::default().event("error").data(json!({"message": e.to_string()}).to_string())
        }
    }
}
