pub mod monitoring;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::endpoints;
use crate::record::Record;
use crate::state::AppState;
use crate::sync_service::types::{HealthStatus, ProcessingStats, SyncOptions, SyncResult};
use monitoring::SYNC_METRICS;

#[derive(Debug, Default, Deserialize)]
pub struct CacheClearQuery {
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub ignore_duplicates: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: ProcessingStats,
    pub error_rate: f64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.engine.perform_health_check().await;
    let status = if health.db_connection {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.engine.processing_stats().await;
    Json(StatsResponse {
        error_rate: crate::sync_service::monitor::error_rate(&stats),
        stats,
    })
}

async fn reset_stats_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.engine.reset_stats().await;
    StatusCode::NO_CONTENT
}

async fn clear_cache_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheClearQuery>,
) -> StatusCode {
    state.engine.clear_cache(query.endpoint.as_deref()).await;
    StatusCode::NO_CONTENT
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
    Query(query): Query<SyncQuery>,
    Json(records): Json<Vec<Record>>,
) -> Result<Json<SyncResult>, (StatusCode, Json<ErrorResponse>)> {
    let Some(descriptor) = endpoints::lookup(&endpoint) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown endpoint {endpoint}"),
            }),
        ));
    };

    let options = SyncOptions {
        batch_size: query.batch_size,
        update_on_conflict: query.ignore_duplicates.then_some(false),
        cancel: Some(state.shutdown_token.child_token()),
        ..SyncOptions::default()
    };
    let result = state
        .engine
        .sync_endpoint_data(descriptor, records, options)
        .await;
    Ok(Json(result))
}

async fn expose_metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|err| {
        error!(event = "metrics_encode_failed", error = %err, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

/// Registers process metrics once; later calls reuse the existing collectors.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;
    if SYNC_METRICS.initialized() {
        return;
    }
    SYNC_METRICS
        .get_or_init(|| async { monitoring::SyncMetrics::register(&mut registry, "sync") })
        .await;
    monitoring::register_build_info_metric(&mut registry, "sync");
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/reset", post(reset_stats_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .route("/sync/:endpoint", post(sync_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state)
}

/// Starts the admin HTTP server on the supplied socket address.
///
/// The server drains in-flight requests once the state's shutdown token is cancelled.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<Result<(), std::io::Error>>, std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(event = "admin_server_listening", addr = %local_addr, "admin server listening");

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await
    });

    Ok(server_handle)
}
