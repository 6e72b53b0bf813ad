//! HTTP API behavior through the router, without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use testpilot::api::{self, state::AppState};
use testpilot::engine::Pacing;
use testpilot::executor::{CaseExecutor, SimulatedStrategy};
use testpilot::storage::{MemoryStore, RunStore};
use tower::ServiceExt;

fn app_with(store: Arc<dyn RunStore>, pacing: Pacing) -> Router {
    let executor = CaseExecutor::new(Arc::new(SimulatedStrategy::new(Some(3))));
    api::router(AppState::new(store, executor, pacing))
}

fn app() -> (Router, Arc<dyn RunStore>) {
    let store: Arc<dyn RunStore> = Arc::new(MemoryStore::open());
    (app_with(store.clone(), Pacing::default()), store)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Poll the run until it leaves `running`.
async fn wait_finished(app: &Router, run_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/api/v1/runs/{}", run_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["status"] != "running" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never finished");
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["meta"]["version"].is_string());
}

#[tokio::test]
async fn test_categories_catalog() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/categories")).await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["login", "navigation", "forms", "links"]);
}

#[tokio::test]
async fn test_start_run_completes_and_registers_project() {
    let (app, store) = app();
    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/runs",
            json!({ "url": "example.com", "categories": ["login", "links"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["data"]["runId"].as_str().unwrap().to_string();

    let run = wait_finished(&app, &run_id).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["testCases"].as_array().unwrap().len(), 2);
    assert!(run["endTime"].is_string());

    let (status, body) = send(&app, get(&format!("/api/v1/runs/{}/cases", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["data"][0]["type"], "login");
    assert_eq!(body["data"][1]["type"], "links");

    let (status, body) = send(&app, get(&format!("/api/v1/runs/{}/events", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["progress"], 100.0);
    assert_eq!(body["data"]["logs"][0]["kind"], "start");

    // Project registration happens on a follow-up task.
    let mut registered = Vec::new();
    for _ in 0..100 {
        registered = store.list_projects().await.unwrap();
        if !registered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].name, "Test - example.com");
    assert_eq!(registered[0].url, "example.com");
    assert_eq!(registered[0].test_runs, vec![run_id]);
}

#[tokio::test]
async fn test_start_run_rejects_bad_target() {
    let (app, store) = app();
    let (status, body) = send(
        &app,
        post_json("/api/v1/runs", json!({ "url": "not a url and no scheme" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].is_string());
    assert!(store.list_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_run_rejects_empty_selection() {
    let (app, _) = app();
    let (status, _) = send(
        &app,
        post_json("/api/v1/runs", json!({ "url": "example.com", "categories": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let (app, _) = app();
    for uri in [
        "/api/v1/runs/nope",
        "/api/v1/runs/nope/cases",
        "/api/v1/runs/nope/events",
    ] {
        let (status, _) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    let (status, _) = send(&app, post_json("/api/v1/runs/nope/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_in_flight_run() {
    let store: Arc<dyn RunStore> = Arc::new(MemoryStore::open());
    let pacing = Pacing {
        generate: Duration::from_millis(200),
        settle: Duration::from_millis(200),
    };
    let app = app_with(store.clone(), pacing);

    let (_, body) = send(
        &app,
        post_json("/api/v1/runs", json!({ "url": "https://example.com" })),
    )
    .await;
    let run_id = body["data"]["runId"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post_json(&format!("/api/v1/runs/{}/cancel", run_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["cancelRequested"], true);

    let run = wait_finished(&app, &run_id).await;
    assert_eq!(run["status"], "failed");
    let executed = run["testCases"].as_array().unwrap().len();
    assert!(executed < 4, "cancelled run executed {executed} categories");

    // Cancelled runs are not registered as projects.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.list_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stats_and_projects_start_empty() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/api/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalProjects"], 0);
    assert_eq!(body["data"]["activeRuns"], 0);

    let (status, body) = send(&app, get("/api/v1/projects")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _) = app();
    let resp = app.oneshot(get("/nowhere")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
