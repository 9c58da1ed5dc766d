//! Health & Status API endpoints
//!
//! - GET /health - Liveness check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Uptime, chain cursors, relay queue counts

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;
use crate::relay::{PermanentFailure, RelayCoordinator, RelayStats};
use crate::types::ChainId;
use crate::watchers::CursorBoard;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct ApiState {
    started_at: Instant,
    cursors: Arc<CursorBoard>,
    coordinator: Arc<RelayCoordinator>,
}

impl ApiState {
    pub fn new(cursors: Arc<CursorBoard>, coordinator: Arc<RelayCoordinator>) -> Self {
        Self {
            started_at: Instant::now(),
            cursors,
            coordinator,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    /// Last block handed to the coordinator, per source chain
    pub cursors: BTreeMap<ChainId, u64>,
    pub relay: RelayStats,
    pub permanent_failures: Vec<PermanentFailure>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        cursors: state.cursors.snapshot(),
        relay: state.coordinator.stats(),
        permanent_failures: state.coordinator.permanent_failures(),
    })
}

async fn prometheus_metrics() -> Response {
    let body = metrics::render();
    if body.is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the API until `shutdown` becomes true
pub async fn start_api_server(
    port: u16,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;
    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .wrap_err("API server failed")?;

    metrics::UP.set(0.0);
    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RetryConfig;
    use crate::token_map::TokenMap;
    use std::collections::HashMap;

    fn state() -> ApiState {
        let coordinator = RelayCoordinator::new(TokenMap::new(), HashMap::new(), RetryConfig::default());
        ApiState::new(Arc::new(CursorBoard::new()), Arc::new(coordinator))
    }

    #[test]
    fn test_health() {
        let Json(body) = tokio_test::block_on(health());
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_status_reports_cursors_and_stats() {
        let state = state();
        state.cursors.set(1, 19_000_000);
        state.cursors.set(8453, 12_000_000);

        let Json(body) = status(State(state)).await;
        assert_eq!(body.cursors.get(&1), Some(&19_000_000));
        assert_eq!(body.cursors.get(&8453), Some(&12_000_000));
        assert_eq!(body.relay.processed, 0);
        assert!(body.permanent_failures.is_empty());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["relay"]["pending_retries"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::UP.set(1.0);
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
