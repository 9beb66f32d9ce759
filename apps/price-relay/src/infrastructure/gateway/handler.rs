//! `GET /prices` handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

use super::error::GatewayError;
use crate::application::ports::SharedPriceSource;
use crate::domain::pricing::{PriceSnapshot, SymbolSet};
use crate::infrastructure::metrics::{self, GatewayOutcome};

/// Query string of `GET /prices`.
#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    /// Comma-separated symbols.
    pub symbols: Option<String>,
}

/// Gateway request counters, shared with the health server.
#[derive(Debug, Default)]
pub struct GatewayStats {
    requests: AtomicU64,
    successes: AtomicU64,
    upstream_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl GatewayStats {
    /// Total requests handled.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Requests answered with prices.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Requests that failed because of the upstream.
    #[must_use]
    pub fn upstream_failures(&self) -> u64 {
        self.upstream_failures.load(Ordering::Relaxed)
    }

    /// Upstream failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Time of the last successful upstream call.
    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    fn record(&self, result: Result<(), &GatewayError>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.last_success.write() = Some(Utc::now());
            }
            Err(error) if error.is_upstream_failure() => {
                self.upstream_failures.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
    }
}

/// State behind the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    source: SharedPriceSource,
    timeout: Duration,
    cache_control: HeaderValue,
    stats: Arc<GatewayStats>,
}

impl GatewayState {
    /// Create gateway state.
    ///
    /// `timeout` bounds each upstream call; `cache_max_age` is advertised on
    /// successful responses.
    #[must_use]
    pub fn new(source: SharedPriceSource, timeout: Duration, cache_max_age: Duration) -> Self {
        let cache_control = HeaderValue::from_str(&format!(
            "public, max-age={}",
            cache_max_age.as_secs()
        ))
        .unwrap_or(HeaderValue::from_static("public, max-age=2"));

        Self {
            source,
            timeout,
            cache_control,
            stats: Arc::new(GatewayStats::default()),
        }
    }

    /// Shared request counters.
    #[must_use]
    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.stats)
    }

    /// Relay one request: validate, call upstream once under the timeout.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] describing the failure.
    pub async fn relay(&self, symbols: Option<&str>) -> Result<PriceSnapshot, GatewayError> {
        let symbols = SymbolSet::parse_csv(symbols.unwrap_or_default())?;

        // The upstream future is dropped if the timer wins.
        tokio::time::timeout(self.timeout, self.source.fetch_prices(&symbols))
            .await
            .map_err(|_| GatewayError::BackendTimeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(GatewayError::from)
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("timeout", &self.timeout)
            .field("cache_control", &self.cache_control)
            .finish_non_exhaustive()
    }
}

/// `GET /prices?symbols=A,B`.
pub async fn prices_handler(
    State(state): State<GatewayState>,
    query: Result<Query<PricesQuery>, QueryRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let started = Instant::now();
    let (symbols, result) = match query {
        Ok(Query(query)) => {
            let result = state.relay(query.symbols.as_deref()).await;
            (query.symbols, result)
        }
        Err(rejection) => (None, Err(GatewayError::from(rejection))),
    };
    let latency = started.elapsed();

    state.stats.record(result.as_ref().map(|_| ()));

    match result {
        Ok(snapshot) => {
            metrics::record_gateway_request(GatewayOutcome::Success, latency);
            tracing::info!(
                %request_id,
                symbols = symbols.as_deref().unwrap_or_default(),
                outcome = GatewayOutcome::Success.as_str(),
                quotes = snapshot.len(),
                latency_ms = latency.as_millis(),
                "Relayed price request"
            );
            (
                [(header::CACHE_CONTROL, state.cache_control.clone())],
                Json(snapshot),
            )
                .into_response()
        }
        Err(error) => {
            metrics::record_gateway_request(error.outcome(), latency);
            if error.is_upstream_failure() {
                tracing::warn!(
                    %request_id,
                    symbols = symbols.as_deref().unwrap_or_default(),
                    outcome = error.outcome().as_str(),
                    error = %error,
                    latency_ms = latency.as_millis(),
                    "Price request failed"
                );
            } else {
                tracing::info!(
                    %request_id,
                    outcome = error.outcome().as_str(),
                    error = %error,
                    "Rejected price request"
                );
            }
            error.into_response()
        }
    }
}
