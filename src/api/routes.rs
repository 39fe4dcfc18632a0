use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::db::models::AuditRow;
use crate::db::writer::recent_events;
use crate::error::AppError;
use crate::screening::{filter_by_search, ExportFormat, RunStatus, Screener, ScreeningFilter, ScreeningReport};
use crate::types::{DataSource, ScoredResult};

#[derive(Clone)]
pub struct ApiState {
    pub screener: Arc<Screener>,
    pub pool: sqlx::SqlitePool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/screening", post(post_screening))
        .route("/api/results", get(get_results))
        .route("/api/export", get(get_export))
        .route("/api/token", put(put_token).delete(delete_token))
        .route("/api/refresh-intervals", get(get_refresh_intervals))
        .route("/api/refresh-intervals/:endpoint", put(put_refresh_interval))
        .route("/api/health", get(get_health))
        .route("/api/stats/latency", get(get_stats_latency))
        .route("/api/audit/recent", get(get_recent_audit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ResultsQuery {
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Deserialize)]
pub struct RefreshIntervalBody {
    pub ms: i64,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub endpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub status: RunStatus,
    pub run_id: Option<u64>,
    pub source: Option<DataSource>,
    pub completed_at_ms: Option<i64>,
    pub results: Vec<ScoredResult>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token_set: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshIntervalResponse {
    pub endpoint: String,
    pub ttl_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub upstream: Value,
    pub token_set: bool,
    pub cache_entries: usize,
    pub pending_requests: usize,
    pub pipeline: RunStatus,
    pub last_run_at_ms: u64,
    pub last_run_results: u64,
    pub last_run_demo: bool,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub audit_rows_written: u64,
    pub audit_write_errors: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub count: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn post_screening(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<ScreeningReport>, AppError> {
    let filter = ScreeningFilter::from_json(&body)?;
    let report = state.screener.run_screening(filter).await?;
    Ok(Json(ScreeningReport::clone(&report)))
}

async fn get_results(
    State(state): State<ApiState>,
    Query(params): Query<ResultsQuery>,
) -> Json<ResultsResponse> {
    let status = state.screener.status();
    let Some(report) = state.screener.latest() else {
        return Json(ResultsResponse {
            status,
            run_id: None,
            source: None,
            completed_at_ms: None,
            results: Vec::new(),
        });
    };

    let results = match params.search.as_deref() {
        Some(term) => filter_by_search(&report.results, term),
        None => report.results.clone(),
    };

    Json(ResultsResponse {
        status,
        run_id: Some(report.run_id),
        source: Some(report.source),
        completed_at_ms: Some(report.completed_at_ms),
        results,
    })
}

async fn get_export(
    State(state): State<ApiState>,
    Query(params): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let name = params.format.as_deref().unwrap_or("csv");
    let format = ExportFormat::from_name(name)
        .ok_or_else(|| AppError::validation(format!("unsupported export format '{name}'")))?;

    let body = state.screener.export_results(format)?;
    let disposition = format!("attachment; filename=\"wheel-screening.{}\"", format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

async fn put_token(State(state): State<ApiState>, Json(body): Json<TokenBody>) -> Json<TokenResponse> {
    let client = state.screener.client();
    client.set_token(body.token);
    Json(TokenResponse {
        token_set: client.token().is_some(),
    })
}

async fn delete_token(State(state): State<ApiState>) -> Json<TokenResponse> {
    state.screener.client().clear_token();
    Json(TokenResponse { token_set: false })
}

async fn get_refresh_intervals(State(state): State<ApiState>) -> Json<Vec<RefreshIntervalResponse>> {
    Json(intervals(&state))
}

async fn put_refresh_interval(
    State(state): State<ApiState>,
    Path(endpoint): Path<String>,
    Json(body): Json<RefreshIntervalBody>,
) -> Result<Json<Vec<RefreshIntervalResponse>>, AppError> {
    state.screener.client().set_refresh_interval(&endpoint, body.ms)?;
    Ok(Json(intervals(&state)))
}

fn intervals(state: &ApiState) -> Vec<RefreshIntervalResponse> {
    state
        .screener
        .client()
        .refresh_intervals()
        .into_iter()
        .map(|(endpoint, ttl)| RefreshIntervalResponse {
            endpoint: endpoint.name().to_string(),
            ttl_ms: ttl.as_millis() as u64,
        })
        .collect()
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let client = state.screener.client();
    let health = state.screener.health();

    let (status, upstream) = match client.check_health().await {
        Ok(h) => ("ok", serde_json::to_value(h).unwrap_or(Value::Null)),
        Err(e) => {
            info!(kind = e.kind.code(), "[HEALTH] upstream check failed: {e}");
            ("degraded", serde_json::json!({ "error": e }))
        }
    };

    Json(HealthResponse {
        status,
        upstream,
        token_set: client.token().is_some(),
        cache_entries: client.cache_len(),
        pending_requests: client.pending_requests(),
        pipeline: state.screener.status(),
        last_run_at_ms: health.last_run_at_ms(),
        last_run_results: health.last_run_results(),
        last_run_demo: health.last_run_demo(),
        runs_completed: health.runs_completed(),
        runs_failed: health.runs_failed(),
        audit_rows_written: health.audit_rows_written(),
        audit_write_errors: health.audit_write_errors(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let latency = state.screener.client().latency();
    let to_ms = |us: u64| us as f64 / 1000.0;
    let percentiles = latency.percentiles();

    Json(LatencyResponse {
        count: latency.len(),
        p50_ms: percentiles.map(|(p50, _, _)| to_ms(p50)),
        p95_ms: percentiles.map(|(_, p95, _)| to_ms(p95)),
        p99_ms: percentiles.map(|(_, _, p99)| to_ms(p99)),
        max_ms: latency.max_us().map(to_ms),
    })
}

async fn get_recent_audit(
    State(state): State<ApiState>,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1000);
    let rows = recent_events(&state.pool, limit, params.endpoint.as_deref()).await?;
    Ok(Json(rows))
}
