//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (fails while the upstream is unhealthy)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! # Status
//!
//! Derived from consecutive upstream failures seen by the gateway:
//! none is healthy, fewer than [`UNHEALTHY_AFTER_FAILURES`] is degraded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::PriceCache;
use crate::infrastructure::gateway::GatewayStats;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::realtime::SharedRealtimeHub;

/// Consecutive upstream failures after which the relay reports unhealthy.
pub const UNHEALTHY_AFTER_FAILURES: u64 = 5;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream status as seen by the gateway.
    pub upstream: UpstreamStatus,
    /// Realtime channel statistics.
    pub realtime: RealtimeStatus,
    /// Price cache statistics.
    pub cache: CacheStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream answering.
    Healthy,
    /// Recent upstream failures.
    Degraded,
    /// Upstream failing persistently.
    Unhealthy,
}

/// Upstream status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Gateway requests handled.
    pub requests: u64,
    /// Requests answered with prices.
    pub successes: u64,
    /// Requests failed by the upstream.
    pub failures: u64,
    /// Upstream failures since the last success.
    pub consecutive_failures: u64,
    /// Last successful upstream call.
    pub last_success: Option<DateTime<Utc>>,
}

/// Realtime channel statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStatus {
    /// Connected WebSocket clients.
    pub clients: usize,
    /// Symbols named by client filters.
    pub watched_symbols: usize,
    /// Symbols with a known quote.
    pub known_symbols: usize,
    /// Updates published since start.
    pub published: u64,
}

/// Price cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Cached symbol sets.
    pub entries: usize,
    /// Fetches in flight.
    pub in_flight: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    gateway: Arc<GatewayStats>,
    cache: PriceCache,
    hub: SharedRealtimeHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        gateway: Arc<GatewayStats>,
        cache: PriceCache,
        hub: SharedRealtimeHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            gateway,
            cache,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Health routes over `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    match determine_health_status(state.gateway.consecutive_failures()) {
        HealthStatus::Healthy | HealthStatus::Degraded => (StatusCode::OK, "READY"),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY"),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let gateway = &state.gateway;
    let consecutive_failures = gateway.consecutive_failures();
    let realtime = state.hub.stats();
    let cache = state.cache.stats();

    HealthResponse {
        status: determine_health_status(consecutive_failures),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            requests: gateway.requests(),
            successes: gateway.successes(),
            failures: gateway.upstream_failures(),
            consecutive_failures,
            last_success: gateway.last_success(),
        },
        realtime: RealtimeStatus {
            clients: realtime.clients,
            watched_symbols: realtime.watched_symbols,
            known_symbols: realtime.known_symbols,
            published: realtime.published,
        },
        cache: CacheStatus {
            entries: cache.entries,
            in_flight: cache.in_flight,
        },
    }
}

const fn determine_health_status(consecutive_failures: u64) -> HealthStatus {
    match consecutive_failures {
        0 => HealthStatus::Healthy,
        n if n < UNHEALTHY_AFTER_FAILURES => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
