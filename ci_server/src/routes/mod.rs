//! CI server HTTP routes for webhooks, builds and KPIs.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use ci_core::Workflow;

use crate::config::CiConfig;
use crate::models::build::Build;
use crate::services::build_service::BuildStore;

/// Shared state for CI route handlers and the build executor.
#[derive(Clone)]
pub struct CiRouterState {
    pub store: Arc<BuildStore>,
    pub config: Arc<CiConfig>,
    /// Workflow used for trigger matching and for repositories without their own.
    pub workflow: Arc<Workflow>,
}

impl CiRouterState {
    pub fn new(config: CiConfig, workflow: Workflow) -> Self {
        Self {
            store: Arc::new(BuildStore::new()),
            config: Arc::new(config),
            workflow: Arc::new(workflow),
        }
    }
}

/// Build the CI server's Axum router.
pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Build API
        .route("/api/builds", get(list_builds_handler))
        .route("/api/builds/trigger", post(trigger_build_handler))
        .route("/api/builds/latest", get(get_latest_build))
        .route("/api/builds/{build_id}", get(get_build))
        // KPI API
        .route("/api/kpi/success_rate", get(kpi_success_rate))
        .route("/api/kpi/avg_duration", get(kpi_avg_duration))
        .route("/api/kpi/builds_by_status", get(kpi_builds_by_status))
        .route("/api/kpi/job_failures", get(kpi_job_failures))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, &headers, body).await
}

// ── Build API ──

async fn trigger_build_handler(
    State(state): State<CiRouterState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), StatusCode> {
    api::trigger_build(&state.store, &state.config, req)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
}

#[derive(serde::Deserialize)]
pub struct ListBuildsQuery {
    pub limit: Option<usize>,
}

async fn list_builds_handler(
    State(state): State<CiRouterState>,
    Query(query): Query<ListBuildsQuery>,
) -> Json<Vec<api::BuildJson>> {
    Json(api::list_builds(&state.store, query.limit.unwrap_or(20)).await)
}

async fn get_build(
    State(state): State<CiRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<Build>, StatusCode> {
    state
        .store
        .get_build(build_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Deserialize)]
pub struct LatestBuildQuery {
    pub repo: String,
    pub branch: String,
}

async fn get_latest_build(
    State(state): State<CiRouterState>,
    Query(query): Query<LatestBuildQuery>,
) -> Result<Json<Build>, StatusCode> {
    state
        .store
        .get_latest(&query.repo, &query.branch)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

// ── KPI API ──

#[derive(serde::Deserialize)]
pub struct KpiQuery {
    pub days: Option<i64>,
}

async fn kpi_success_rate(
    State(state): State<CiRouterState>,
    Query(query): Query<KpiQuery>,
) -> Json<crate::dashboard::kpi::BuildSuccessRate> {
    Json(crate::dashboard::kpi::query_success_rate(&state.store, query.days.unwrap_or(30)).await)
}

async fn kpi_avg_duration(
    State(state): State<CiRouterState>,
    Query(query): Query<KpiQuery>,
) -> Json<crate::dashboard::kpi::AvgBuildDuration> {
    Json(crate::dashboard::kpi::query_avg_duration(&state.store, query.days.unwrap_or(30)).await)
}

async fn kpi_builds_by_status(
    State(state): State<CiRouterState>,
    Query(query): Query<KpiQuery>,
) -> Json<Vec<crate::dashboard::kpi::BuildsByStatus>> {
    Json(crate::dashboard::kpi::query_builds_by_status(&state.store, query.days.unwrap_or(30)).await)
}

async fn kpi_job_failures(
    State(state): State<CiRouterState>,
    Query(query): Query<KpiQuery>,
) -> Json<Vec<crate::dashboard::kpi::JobFailures>> {
    Json(crate::dashboard::kpi::query_job_failures(&state.store, query.days.unwrap_or(30)).await)
}
