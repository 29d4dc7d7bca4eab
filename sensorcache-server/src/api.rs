// SensorCache Server - HTTP routes and handlers
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Axum router for ingestion, queries and operational endpoints.
//!
//! Every route is wrapped by the service's admission control. Query
//! responses are plain text; lookups that find nothing answer
//! `501 Not Implemented`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sensorcache::{StatsSnapshot, TelemetryError, TelemetryService, TransportMetrics};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::{
    encode_metrics, record_http_request, update_service_metrics, update_transport_metrics,
};
use crate::replay::{DatasetInfo, ReplayState};

/// Application state shared across handlers.
pub struct AppState {
    pub service: Arc<TelemetryService>,
    pub replay: Option<Arc<ReplayState>>,
    pub dataset: Option<DatasetInfo>,
}

impl AppState {
    pub fn new(service: Arc<TelemetryService>) -> Self {
        Self {
            service,
            replay: None,
            dataset: None,
        }
    }

    /// Attach a running replay for `/status`.
    pub fn with_replay(mut self, replay: Arc<ReplayState>, dataset: DatasetInfo) -> Self {
        self.replay = Some(replay);
        self.dataset = Some(dataset);
        self
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/temp", post(submit_handler))
        .route("/temp/", post(submit_handler))
        .route("/temp/daily_max/:sensor_id/:date", get(daily_max_handler))
        .route("/temp/daily_min/:sensor_id/:date", get(daily_min_handler))
        .route("/temp/daily_avg/:sensor_id/:date", get(daily_avg_handler))
        .route("/temp/weekly_max/:sensor_id", get(weekly_max_handler))
        .route("/temp/weekly_max/:sensor_id/:date", get(weekly_max_handler))
        .route("/temp/weekly_min/:sensor_id", get(weekly_min_handler))
        .route("/temp/weekly_min/:sensor_id/:date", get(weekly_min_handler))
        .route("/temp/weekly_avg/:sensor_id", get(weekly_avg_handler))
        .route("/temp/weekly_avg/:sensor_id/:date", get(weekly_avg_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .with_state(state)
}

/// Admit the request through the service's concurrency limit and count the
/// response by route and status.
async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = match state.service.admission().run(next.run(request)).await {
        Ok(response) => response,
        Err(e) => ApiError(e).into_response(),
    };

    record_http_request(&route, response.status().as_u16());
    response
}

/// Engine error rendered as a plain-text HTTP response.
#[derive(Debug)]
pub struct ApiError(pub TelemetryError);

impl From<TelemetryError> for ApiError {
    fn from(e: TelemetryError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TelemetryError::NotFound { .. } | TelemetryError::EmptyDate { .. } => {
                StatusCode::NOT_IMPLEMENTED
            }
            TelemetryError::Malformed(_) => StatusCode::BAD_REQUEST,
            TelemetryError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", self.0);
        } else {
            debug!("Request answered {}: {}", status, self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

// ============================================================
// Ingestion
// ============================================================

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(rename = "sensorId")]
    sensor_id: String,
    temp: i64,
}

/// The body is decoded by hand so any undecodable payload answers 400.
async fn submit_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: SubmitRequest = serde_json::from_slice(&body)
        .map_err(|e| TelemetryError::Malformed(format!("Invalid reading body: {}", e)))?;
    state
        .service
        .submit(&request.sensor_id, request.temp)
        .await?;
    Ok(StatusCode::OK)
}

// ============================================================
// Queries
// ============================================================

#[derive(Debug, Deserialize)]
struct WeeklyPath {
    sensor_id: String,
    /// Accepted for compatibility with older clients; the window is always
    /// the retained dates.
    #[serde(default)]
    date: Option<String>,
}

fn format_avg(avg: f64) -> String {
    format!("{:.6}", avg)
}

async fn daily_max_handler(
    State(state): State<Arc<AppState>>,
    Path((sensor_id, date)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let max = state.service.daily_max(&sensor_id, &date).await?;
    Ok(max.to_string())
}

async fn daily_min_handler(
    State(state): State<Arc<AppState>>,
    Path((sensor_id, date)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let min = state.service.daily_min(&sensor_id, &date).await?;
    Ok(min.to_string())
}

async fn daily_avg_handler(
    State(state): State<Arc<AppState>>,
    Path((sensor_id, date)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let avg = state.service.daily_avg(&sensor_id, &date).await?;
    Ok(format_avg(avg))
}

async fn weekly_max_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<WeeklyPath>,
) -> Result<String, ApiError> {
    if let Some(date) = &path.date {
        debug!("Ignoring date segment '{}' on weekly query", date);
    }
    let max = state.service.weekly_max(&path.sensor_id).await?;
    Ok(max.to_string())
}

async fn weekly_min_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<WeeklyPath>,
) -> Result<String, ApiError> {
    if let Some(date) = &path.date {
        debug!("Ignoring date segment '{}' on weekly query", date);
    }
    let min = state.service.weekly_min(&path.sensor_id).await?;
    Ok(min.to_string())
}

async fn weekly_avg_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<WeeklyPath>,
) -> Result<String, ApiError> {
    if let Some(date) = &path.date {
        debug!("Ignoring date segment '{}' on weekly query", date);
    }
    let avg = state.service.weekly_avg(&path.sensor_id).await?;
    Ok(format_avg(avg))
}

// ============================================================
// Operational endpoints
// ============================================================

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler; not ready once shutdown has begun.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.service.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
    } else {
        (StatusCode::OK, "Ready")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    ingest_mode: String,
    cached_sensors: usize,
    in_flight: usize,
    max_in_flight: usize,
    stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport: Option<TransportStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay: Option<ReplayStatus>,
}

#[derive(Serialize)]
struct TransportStatus {
    messages_published: u64,
    bytes_published: u64,
    messages_rejected: u64,
}

impl From<TransportMetrics> for TransportStatus {
    fn from(m: TransportMetrics) -> Self {
        Self {
            messages_published: m.messages_published,
            bytes_published: m.bytes_published,
            messages_rejected: m.messages_rejected,
        }
    }
}

/// Replay status information.
#[derive(Serialize)]
struct ReplayStatus {
    running: bool,
    position: usize,
    total_rows: usize,
    progress_percent: f64,
    readings_ingested: usize,
    readings_rejected: usize,
    sensor_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let replay = state.replay.as_ref().map(|replay_state| {
        let position = replay_state.position.load(Ordering::SeqCst);
        let total = replay_state.total_rows.load(Ordering::SeqCst);
        let progress = if total > 0 {
            (position as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        ReplayStatus {
            running: replay_state.running.load(Ordering::SeqCst),
            position,
            total_rows: total,
            progress_percent: progress,
            readings_ingested: replay_state.readings_ingested.load(Ordering::SeqCst),
            readings_rejected: replay_state.readings_rejected.load(Ordering::SeqCst),
            sensor_count: state.dataset.as_ref().map(|i| i.sensor_count).unwrap_or(0),
            duration_ms: state.dataset.as_ref().map(|i| i.duration_ms),
        }
    });

    let service = &state.service;
    let admission = service.admission();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: service.uptime().as_secs(),
        ingest_mode: service.ingest_mode().to_string(),
        cached_sensors: service.cached_sensor_count().await,
        in_flight: admission.in_flight(),
        max_in_flight: admission.capacity(),
        stats: service.stats(),
        transport: service.transport_metrics().map(TransportStatus::from),
        replay,
    })
}

/// Refresh the gauges from the service, then encode the registry.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let service = &state.service;
    update_service_metrics(
        &service.stats(),
        service.cached_sensor_count().await,
        service.admission().in_flight(),
    );
    if let Some(transport) = service.transport_metrics() {
        update_transport_metrics(&transport);
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}
