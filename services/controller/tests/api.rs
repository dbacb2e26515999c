// Drives the controller over HTTP with real mock hospital nodes behind it.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use medilearn_controller::{router, AppState};
use medilearn_core::federated_learning::{NodeEndpoint, RunConfig};
use medilearn_core::{CoordinatorSettings, FederatedLearningCoordinator, HttpNodeClient, StateStore};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn spawn_node(name: &'static str, delay: Duration) -> NodeEndpoint {
    let app = Router::new().route(
        "/train",
        post(move |Json(_): Json<Value>| async move {
            tokio::time::sleep(delay).await;
            Json(json!({"hospital": name, "accuracy": 0.8, "samples": 50, "weights": [[[0.1, 0.2]], [0.3]]}))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    NodeEndpoint::new(name, format!("http://{addr}/train"))
}

async fn spawn_controller(default_run: RunConfig) -> String {
    let dir = std::env::temp_dir().join(format!("medilearn-api-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(StateStore::open(dir).await.unwrap());
    let client = Arc::new(HttpNodeClient::new(Duration::from_secs(2)).unwrap());
    let coordinator = FederatedLearningCoordinator::new(store, client, CoordinatorSettings { inter_cycle_delay: Duration::ZERO, default_run });
    let app = router(AppState::new(coordinator, Duration::from_millis(50)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

async fn get_json(base: &str, path: &str) -> (StatusCode, Value) {
    let resp = reqwest::get(format!("{base}{path}")).await.unwrap();
    let code = resp.status();
    (code, resp.json().await.unwrap())
}

async fn wait_idle(base: &str) {
    for _ in 0..200 {
        let (_, health) = get_json(base, "/health").await;
        if health["running"] == json!(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run did not finish");
}

#[tokio::test]
async fn run_is_started_and_observable() {
    let nodes = vec![spawn_node("Hospital_A", Duration::from_millis(200)).await, spawn_node("Hospital_B", Duration::ZERO).await];
    let base = spawn_controller(RunConfig { cycle_count: 2, node_endpoints: nodes }).await;
    let http = reqwest::Client::new();

    let (code, body) = get_json(&base, "/status").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert_eq!(get_json(&base, "/global_model").await.1["global_model"], Value::Null);

    let resp = http.post(format!("{base}/start")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["cycle_count"], 2);
    assert_eq!(ack["nodes"], json!(["Hospital_A", "Hospital_B"]));

    let again = http.post(format!("{base}/start")).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
    let busy = http.post(format!("{base}/reset")).send().await.unwrap();
    assert_eq!(busy.status(), StatusCode::CONFLICT);

    wait_idle(&base).await;
    let (code, status) = get_json(&base, "/status").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(status["cycles_completed"], 2);
    assert_eq!(status["run_id"], ack["run_id"]);
    assert_eq!(status["latest"]["global_accuracy"], 0.8);

    let (_, history) = get_json(&base, "/history").await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    let (_, model) = get_json(&base, "/global_model").await;
    assert_eq!(model["global_model"]["version"], 2);
    assert_eq!(model["global_model"]["parameters"], json!([[[0.1, 0.2]], [0.3]]));
    assert_eq!(get_json(&base, "/health").await.1["runs_finished"], 1);
    let (_, audit) = get_json(&base, "/audit_log").await;
    assert_eq!(audit.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn reset_clears_state() {
    let nodes = vec![spawn_node("Hospital_A", Duration::ZERO).await];
    let base = spawn_controller(RunConfig { cycle_count: 1, node_endpoints: nodes }).await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/start")).send().await.unwrap();
    wait_idle(&base).await;
    assert_eq!(get_json(&base, "/status").await.0, StatusCode::OK);

    let resp = http.post(format!("{base}/reset")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(get_json(&base, "/status").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get_json(&base, "/history").await.1, json!([]));
    assert_eq!(get_json(&base, "/audit_log").await.1, json!([]));
}

#[tokio::test]
async fn config_update_is_validated_and_used_by_next_start() {
    let a = spawn_node("Hospital_A", Duration::ZERO).await;
    let b = spawn_node("Hospital_B", Duration::ZERO).await;
    let base = spawn_controller(RunConfig { cycle_count: 1, node_endpoints: vec![a] }).await;
    let http = reqwest::Client::new();

    let invalid = http.put(format!("{base}/config")).json(&json!({"cycle_count": 0, "node_endpoints": []})).send().await.unwrap();
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["error"], "invalid_config");
    assert_eq!(get_json(&base, "/nodes").await.1["nodes"], json!(["Hospital_A"]));

    let updated = RunConfig { cycle_count: 1, node_endpoints: vec![b] };
    let resp = http.put(format!("{base}/config")).json(&updated).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(get_json(&base, "/config").await.1, serde_json::to_value(&updated).unwrap());

    let ack: Value = http.post(format!("{base}/start")).send().await.unwrap().json().await.unwrap();
    assert_eq!(ack["nodes"], json!(["Hospital_B"]));
    wait_idle(&base).await;
    let (_, status) = get_json(&base, "/status").await;
    assert_eq!(status["latest"]["node_results"][0]["node_name"], "Hospital_B");
}

#[tokio::test]
async fn stream_pushes_placeholder_before_first_cycle() {
    let base = spawn_controller(RunConfig::default()).await;
    let mut resp = reqwest::get(format!("{base}/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/event-stream"));

    let chunk = tokio::time::timeout(Duration::from_secs(2), resp.chunk()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: status"), "{text}");
    assert!(text.contains("data:"), "{text}");
    assert!(text.contains("no cycle completed yet"), "{text}");
}

#[tokio::test]
async fn stream_pushes_full_status_after_cycle() {
    let nodes = vec![spawn_node("Hospital_A", Duration::ZERO).await];
    let base = spawn_controller(RunConfig { cycle_count: 1, node_endpoints: nodes }).await;
    reqwest::Client::new().post(format!("{base}/start")).send().await.unwrap();
    wait_idle(&base).await;
    let (_, expected) = get_json(&base, "/status").await;

    let mut resp = reqwest::get(format!("{base}/stream")).await.unwrap();
    let mut buf = String::new();
    while !buf.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(2), resp.chunk()).await.unwrap().unwrap().unwrap();
        buf.push_str(&String::from_utf8_lossy(&chunk));
    }
    let event = buf.split("\n\n").next().unwrap();
    assert!(event.lines().any(|l| l == "event: status"), "{event}");
    let data: String = event.lines().filter_map(|l| l.strip_prefix("data:")).map(str::trim_start).collect();
    let pushed: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(pushed, expected);
    assert_eq!(pushed["cycles_completed"], 1);
    assert_eq!(pushed["latest"]["node_results"][0]["node_name"], "Hospital_A");
}

#[tokio::test]
async fn health_reports_idle_controller() {
    let base = spawn_controller(RunConfig::default()).await;
    let (code, health) = get_json(&base, "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["running"], false);
    assert_eq!(health["phase"]["phase"], "idle");
    assert_eq!(health["last_error"], Value::Null);
    assert_eq!(health["runs_finished"], 0);
    assert_eq!(get_json(&base, "/").await.1["service"], "medilearn-controller");
}
