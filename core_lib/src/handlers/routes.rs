//! HTTP routes exposing check results

use crate::{error::Result, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Query parameter carrying the cache-bypass secret. Every other query
/// parameter is a check override.
const REFRESH_PARAM: &str = "refresh";

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handle_root))
        .route("/checks", get(handle_list_checks))
        .route("/checks/:project", get(handle_project_checks))
        .route("/checks/:project/:name", get(handle_check))
        .route("/tags/:tag", get(handle_tag_checks))
        .route("/__heartbeat__", get(handle_heartbeat))
        .route("/__lbheartbeat__", get(handle_lbheartbeat))
        .route("/__version__", get(handle_version))
}

async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "hello": state.app_name }))
}

async fn handle_list_checks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.list_checks())
}

async fn handle_project_checks(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<impl IntoResponse> {
    info!("GET /checks/{}", project);

    let reports = state.orchestrator.run_checks_by_project(&project).await?;
    Ok(Json(reports))
}

async fn handle_check(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    Query(mut query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    let refresh = query.remove(REFRESH_PARAM);
    let overrides: BTreeMap<String, String> = query.into_iter().collect();
    info!(
        refresh = refresh.is_some(),
        overrides = overrides.len(),
        "GET /checks/{}/{}", project, name
    );

    let report = state
        .orchestrator
        .run_check(&project, &name, &overrides, refresh.as_deref())
        .await?;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status, Json(report)))
}

async fn handle_tag_checks(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<impl IntoResponse> {
    info!("GET /tags/{}", tag);

    let reports = state.orchestrator.run_checks_by_tag(&tag).await?;
    Ok(Json(reports))
}

async fn handle_heartbeat(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "checks": state.orchestrator.registry().len(),
        "cache": state.orchestrator.cache().stats(),
    }))
}

async fn handle_lbheartbeat() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_version(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let content = tokio::fs::read_to_string(&state.version_file).await?;
    let version: serde_json::Value = serde_json::from_str(&content)?;
    Ok(Json(version))
}
