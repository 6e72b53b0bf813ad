//! API route definitions.

use super::state::AppState;
use super::ApiError;
use crate::category::{self, Category};
use crate::engine::RunRequest;
use crate::projects;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/categories", get(list_categories))
        .route("/runs", get(list_runs).post(start_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cases", get(list_run_cases))
        .route("/runs/{id}/events", get(run_events))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/projects", get(list_projects))
        .route("/stats", get(stats))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": { "status": "ok" },
        "meta": meta()
    }))
}

async fn list_categories() -> Json<Value> {
    Json(json!({ "data": category::catalog(), "meta": meta() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunBody {
    url: String,
    #[serde(default)]
    categories: Option<Vec<Category>>,
    #[serde(default)]
    project_id: Option<String>,
}

async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<StartRunBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let categories = body.categories.unwrap_or_else(|| Category::ALL.to_vec());
    let mut request = RunRequest::new(body.url, categories);
    request.project_id = body.project_id;

    let prepared = state.engine.prepare(request).await?;
    let run_id = prepared.run_id.clone();
    let cancel = CancellationToken::new();
    state.live.track(&run_id, cancel.clone());
    let handle = state.engine.spawn(prepared, cancel);
    info!(%run_id, "Run started via API");

    let store = state.store.clone();
    tokio::spawn(async move {
        match handle.wait().await {
            Ok(summary) => {
                if let Err(e) = projects::register_completed_run(store.as_ref(), &summary).await {
                    warn!(run_id = %summary.run_id, error = %e, "Failed to register project");
                }
            }
            Err(e) => warn!(error = %e, "Run ended with an error"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "data": { "runId": run_id }, "meta": meta() })),
    ))
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let runs = state.store.list_runs().await?;
    Ok(Json(json!({ "data": runs, "meta": { "total": runs.len() } })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state.store.get_run(&id).await?;
    Ok(Json(json!({ "data": run, "meta": meta() })))
}

async fn list_run_cases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // Surface unknown runs as 404 rather than an empty list.
    state.store.get_run(&id).await?;
    let cases = state.store.list_cases_by_run(&id).await?;
    Ok(Json(json!({ "data": cases, "meta": { "total": cases.len() } })))
}

async fn run_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state
        .live
        .snapshot(&id)
        .ok_or_else(|| ApiError::NotFound(format!("no live events for run '{}'", id)))?;
    Ok(Json(json!({ "data": snapshot, "meta": meta() })))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !state.live.cancel(&id) {
        return Err(ApiError::NotFound(format!("run '{}' is not in flight", id)));
    }
    info!(run_id = %id, "Cancellation requested via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "data": { "runId": id, "cancelRequested": true } })),
    ))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let projects = state.store.list_projects().await?;
    Ok(Json(json!({ "data": projects, "meta": { "total": projects.len() } })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = projects::dashboard(state.store.as_ref()).await?;
    Ok(Json(json!({ "data": stats, "meta": meta() })))
}
