//! HTTP API for the dashboard.
//!
//! Serves the live metrics and the per-tab datasets as JSON; chart rendering
//! is entirely client-side. Endpoints:
//!
//! - `GET /health` — liveness
//! - `GET /api/status` — machine state, identity, poller and cache counters
//! - `GET /api/metrics` — header tiles with latest-vs-previous deltas
//! - `GET /api/overview?range=` — efficiency trends and recent rows
//! - `GET /api/temperature?range=` — sealing temperatures
//! - `GET /api/production?range=` — speed and counter metrics
//! - `GET /api/leakage?range=` — classifier predictions over the window

use crate::config::{Config, Thresholds};
use crate::core::stats::{
    downsample, latest_delta, percent_change, summarize, SeriesSummary, DEFAULT_MAX_POINTS,
};
use crate::core::status::{machine_status, MachineState};
use crate::db::{DataLoader, MachineReading, TimeRange};
use crate::model::{
    batch_infer, infer, summarize_predictions, CacheStats, ModelError, PredictionCache,
    PredictionCounts, Predictor, RowPrediction,
};
use crate::poller::{PollSnapshot, PollStats};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared server state.
pub struct ServerState {
    loader: Arc<DataLoader>,
    predictor: Predictor,
    predictions: PredictionCache,
    poll_stats: Arc<PollStats>,
    thresholds: Thresholds,
    tz: chrono_tz::Tz,
    device: String,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        loader: Arc<DataLoader>,
        predictor: Predictor,
        poll_stats: Arc<PollStats>,
        config: &Config,
    ) -> Self {
        let device = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            loader,
            predictor,
            predictions: PredictionCache::new(
                std::time::Duration::from_secs(config.prediction_cache_ttl_secs),
                config.prediction_cache_capacity,
            ),
            poll_stats,
            thresholds: config.thresholds.clone(),
            tz: config.tz(),
            device,
            instance_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    pub fn predictions(&self) -> &PredictionCache {
        &self.predictions
    }

    /// Render a datalog timestamp in the configured plant timezone.
    fn localize(&self, t: NaiveDateTime) -> String {
        match self.tz.from_local_datetime(&t) {
            LocalResult::Single(dt) => dt.to_rfc3339(),
            _ => t.to_string(),
        }
    }
}

/// API error responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("no data available")]
    NoData,
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        ApiError::Model(err.to_string())
    }
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Database(msg) => {
                tracing::error!("database error: {msg}");
                (StatusCode::SERVICE_UNAVAILABLE, "DATABASE_ERROR")
            }
            ApiError::Model(msg) => {
                tracing::error!("model error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "MODEL_ERROR")
            }
            ApiError::NoData => (StatusCode::NOT_FOUND, "NO_DATA"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Range query shared by the trend endpoints.
#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    range: Option<TimeRange>,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct MachineStatusBody {
    state: MachineState,
    symbol: String,
    output_time_delta_secs: i64,
    latest_at: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    machine: MachineStatusBody,
    database: String,
    predictor: &'static str,
    device: String,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
    poller: PollSnapshot,
    prediction_cache: CacheStats,
}

/// GET /api/status
///
/// Never fails on a broken database; the connection state is part of the
/// payload so the dashboard can render a degraded banner.
async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let (machine, database) = match state.loader.latest().await {
        Ok(rows) => {
            let report = machine_status(&rows);
            let database = if rows.is_empty() {
                "no recent data".to_string()
            } else {
                "connected".to_string()
            };
            (
                MachineStatusBody {
                    state: report.state,
                    symbol: report.state.symbol().to_string(),
                    output_time_delta_secs: report.output_time_delta_secs,
                    latest_at: report.latest_at.map(|t| state.localize(t)),
                },
                database,
            )
        }
        Err(e) => (
            MachineStatusBody {
                state: MachineState::Unknown,
                symbol: MachineState::Unknown.symbol().to_string(),
                output_time_delta_secs: 0,
                latest_at: None,
            },
            format!("error: {e}"),
        ),
    };

    Json(StatusResponse {
        machine,
        database,
        predictor: state.predictor.kind(),
        device: state.device.clone(),
        instance_id: state.instance_id,
        started_at: state.started_at,
        poller: state.poll_stats.snapshot(),
        prediction_cache: state.predictions.stats(),
    })
}

#[derive(Serialize)]
struct MetricTile {
    value: f64,
    delta: Option<f64>,
    below_warning: bool,
}

#[derive(Serialize)]
struct MetricsResponse {
    state: MachineState,
    symbol: String,
    availability: MetricTile,
    performance: MetricTile,
    quality: MetricTile,
    oee: MetricTile,
}

fn tile(values: Vec<f64>, warning: Option<f64>) -> MetricTile {
    let value = values.first().copied().unwrap_or(0.0);
    MetricTile {
        value,
        delta: latest_delta(&values),
        below_warning: warning.map(|w| value < w).unwrap_or(false),
    }
}

/// GET /api/metrics
async fn metrics(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let rows = state.loader.latest().await?;
    if rows.is_empty() {
        return Err(ApiError::NoData);
    }

    let report = machine_status(&rows);
    let series = |f: fn(&MachineReading) -> f64| rows.iter().map(f).collect::<Vec<_>>();
    let t = &state.thresholds;

    Ok(Json(MetricsResponse {
        state: report.state,
        symbol: report.state.symbol().to_string(),
        availability: tile(series(|r| r.availability), None),
        performance: tile(series(|r| r.performance), Some(t.performance_warning)),
        quality: tile(series(|r| r.quality), Some(t.quality_warning)),
        oee: tile(series(|r| r.oee), Some(t.oee_warning)),
    }))
}

#[derive(Serialize)]
struct EfficiencyPoint {
    at: String,
    availability: f64,
    performance: f64,
    quality: f64,
    oee: f64,
}

#[derive(Serialize)]
struct RecentRow {
    at: String,
    counter_output: i64,
    counter_reject: i64,
    availability: f64,
    performance: f64,
    quality: f64,
    oee: f64,
}

#[derive(Serialize)]
struct OverviewResponse {
    range: TimeRange,
    trend: Vec<EfficiencyPoint>,
    recent: Vec<RecentRow>,
}

/// GET /api/overview
async fn overview(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<OverviewResponse>, ApiError> {
    let range = query.range.unwrap_or_default();
    let historical = state.loader.historical(range).await?;
    let latest = state.loader.latest().await?;

    let mut ordered = historical;
    ordered.sort_by_key(|r| r.times);
    let trend = downsample(&ordered, DEFAULT_MAX_POINTS)
        .into_iter()
        .map(|r| EfficiencyPoint {
            at: state.localize(r.times),
            availability: r.availability,
            performance: r.performance,
            quality: r.quality,
            oee: r.oee,
        })
        .collect();

    let recent = latest
        .iter()
        .take(5)
        .map(|r| RecentRow {
            at: state.localize(r.times),
            counter_output: r.counter_output,
            counter_reject: r.counter_reject,
            availability: r.availability,
            performance: r.performance,
            quality: r.quality,
            oee: r.oee,
        })
        .collect();

    Ok(Json(OverviewResponse {
        range,
        trend,
        recent,
    }))
}

/// Sensor positions on the sealing bars, in display order.
const TEMP_SENSORS: [(&str, fn(&MachineReading) -> f64); 4] = [
    ("vertical_upper", |r| r.seal_temp_vertical_upper),
    ("vertical_lower", |r| r.seal_temp_vertical_lower),
    ("horizontal_front", |r| r.seal_temp_horizontal_front),
    ("horizontal_rear", |r| r.seal_temp_horizontal_rear),
];

fn temp_level(value: f64, thresholds: &Thresholds) -> &'static str {
    if value > thresholds.temp_danger {
        "critical"
    } else if value > thresholds.temp_warning {
        "warning"
    } else {
        "normal"
    }
}

#[derive(Serialize)]
struct TemperatureNow {
    sensor: &'static str,
    value: f64,
    level: &'static str,
}

#[derive(Serialize)]
struct TemperatureStats {
    sensor: &'static str,
    summary: SeriesSummary,
}

#[derive(Serialize)]
struct TemperaturePoint {
    at: String,
    vertical_upper: f64,
    vertical_lower: f64,
    horizontal_front: f64,
    horizontal_rear: f64,
}

#[derive(Serialize)]
struct TemperatureResponse {
    range: TimeRange,
    current: Vec<TemperatureNow>,
    stats: Vec<TemperatureStats>,
    trend: Vec<TemperaturePoint>,
}

/// GET /api/temperature
async fn temperature(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<TemperatureResponse>, ApiError> {
    let range = query.range.unwrap_or_default();
    let latest = state.loader.latest().await?;
    let newest = latest.first().ok_or(ApiError::NoData)?;

    let current = TEMP_SENSORS
        .iter()
        .map(|&(sensor, extract)| {
            let value = extract(newest);
            TemperatureNow {
                sensor,
                value,
                level: temp_level(value, &state.thresholds),
            }
        })
        .collect();

    let mut historical = state.loader.historical(range).await?;
    historical.sort_by_key(|r| r.times);

    let stats = TEMP_SENSORS
        .iter()
        .filter_map(|&(sensor, extract)| {
            let values: Vec<f64> = historical.iter().map(extract).collect();
            summarize(&values).map(|summary| TemperatureStats { sensor, summary })
        })
        .collect();

    let trend = downsample(&historical, DEFAULT_MAX_POINTS)
        .into_iter()
        .map(|r| TemperaturePoint {
            at: state.localize(r.times),
            vertical_upper: r.seal_temp_vertical_upper,
            vertical_lower: r.seal_temp_vertical_lower,
            horizontal_front: r.seal_temp_horizontal_front,
            horizontal_rear: r.seal_temp_horizontal_rear,
        })
        .collect();

    Ok(Json(TemperatureResponse {
        range,
        current,
        stats,
        trend,
    }))
}

#[derive(Serialize)]
struct ProductionNow {
    speed_rpm: f64,
    output_packs: i64,
    output_change_pct: Option<f64>,
    reject_packs: i64,
    reject_delta: Option<f64>,
}

#[derive(Serialize)]
struct ProductionPoint {
    at: String,
    speed_rpm: f64,
    counter_output: i64,
    counter_reject: i64,
}

#[derive(Serialize)]
struct ProductionResponse {
    range: TimeRange,
    current: ProductionNow,
    trend: Vec<ProductionPoint>,
}

/// GET /api/production
async fn production(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ProductionResponse>, ApiError> {
    let range = query.range.unwrap_or_default();
    let latest = state.loader.latest().await?;
    let newest = latest.first().ok_or(ApiError::NoData)?;
    let previous = latest.get(1);

    let current = ProductionNow {
        speed_rpm: newest.speed_rpm,
        output_packs: newest.counter_output,
        output_change_pct: previous.and_then(|p| {
            percent_change(newest.counter_output as f64, p.counter_output as f64)
        }),
        reject_packs: newest.counter_reject,
        reject_delta: previous.map(|p| (newest.counter_reject - p.counter_reject) as f64),
    };

    let mut historical = state.loader.historical(range).await?;
    historical.sort_by_key(|r| r.times);

    let trend = downsample(&historical, DEFAULT_MAX_POINTS)
        .into_iter()
        .map(|r| ProductionPoint {
            at: state.localize(r.times),
            speed_rpm: r.speed_rpm,
            counter_output: r.counter_output,
            counter_reject: r.counter_reject,
        })
        .collect();

    Ok(Json(ProductionResponse {
        range,
        current,
        trend,
    }))
}

#[derive(Serialize)]
struct LeakagePoint {
    at: String,
    class: String,
    probability: f64,
}

#[derive(Serialize)]
struct LeakageResponse {
    range: TimeRange,
    predictor: &'static str,
    counts: PredictionCounts,
    latest: Option<LeakagePoint>,
    trend: Vec<LeakagePoint>,
    recent: Vec<LeakagePoint>,
    cache: CacheStats,
}

fn leakage_point(state: &ServerState, p: &RowPrediction) -> LeakagePoint {
    LeakagePoint {
        at: state.localize(p.at),
        class: p.class.label().to_string(),
        probability: p.probability,
    }
}

/// GET /api/leakage
async fn leakage(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<LeakageResponse>, ApiError> {
    let range = query.range.unwrap_or_default();
    let historical = state.loader.historical(range).await?;
    let latest = state.loader.latest().await?;

    let batch = batch_infer(&state.predictor, &state.predictions, &historical)?;
    let counts = summarize_predictions(&batch);

    let latest_prediction = infer(&state.predictor, &state.predictions, &latest)?
        .map(|p| LeakagePoint {
            at: latest
                .first()
                .map(|r| state.localize(r.times))
                .unwrap_or_default(),
            class: p.class.label().to_string(),
            probability: p.probability,
        });

    let trend = downsample(&batch, DEFAULT_MAX_POINTS)
        .iter()
        .map(|p| leakage_point(&state, p))
        .collect();

    let recent = batch
        .iter()
        .rev()
        .take(10)
        .map(|p| leakage_point(&state, p))
        .collect();

    Ok(Json(LeakageResponse {
        range,
        predictor: state.predictor.kind(),
        counts,
        latest: latest_prediction,
        trend,
        recent,
        cache: state.predictions.stats(),
    }))
}

/// Build the router.
fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/metrics", get(metrics))
        .route("/api/overview", get(overview))
        .route("/api/temperature", get(temperature))
        .route("/api/production", get(production))
        .route("/api/leakage", get(leakage))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run(
    state: Arc<ServerState>,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("dashboard API listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("server shutdown signal received");
            })
            .await
        {
            tracing::error!("server error: {e}");
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_level_bands() {
        let t = Thresholds::default();
        assert_eq!(temp_level(120.0, &t), "normal");
        assert_eq!(temp_level(180.0, &t), "warning");
        assert_eq!(temp_level(260.0, &t), "critical");
    }

    #[test]
    fn test_tile_deltas() {
        let full = tile(vec![73.4, 71.0], Some(75.0));
        assert_eq!(full.value, 73.4);
        assert!(full.delta.unwrap() > 2.3);
        assert!(full.below_warning);

        let single = tile(vec![73.4], None);
        assert!(single.delta.is_none());
        assert!(!single.below_warning);
    }
}
