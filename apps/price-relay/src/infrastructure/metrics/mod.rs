//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Gateway**: Requests by outcome and request latency
//! - **Upstream**: Fetch latency and errors by kind
//! - **Cache**: Hits, misses, coalesced joins and retries
//! - **Realtime**: Connected clients, published updates, dropped messages
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::FetchError;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_relay_gateway_requests_total",
        "Gateway requests by outcome"
    );
    describe_histogram!(
        "price_relay_gateway_request_seconds",
        "Gateway request latency including the upstream call"
    );

    describe_histogram!(
        "price_relay_upstream_fetch_seconds",
        "Latency of single upstream price fetches"
    );
    describe_counter!(
        "price_relay_upstream_errors_total",
        "Failed upstream price fetches by error kind"
    );

    describe_counter!(
        "price_relay_cache_lookups_total",
        "Price cache lookups by outcome (hit, miss, joined)"
    );
    describe_counter!(
        "price_relay_fetch_retries_total",
        "Retries scheduled after failed price fetches"
    );

    describe_gauge!(
        "price_relay_realtime_clients",
        "Connected realtime WebSocket clients"
    );
    describe_counter!(
        "price_relay_realtime_updates_published_total",
        "Price updates published to the realtime hub"
    );
    describe_counter!(
        "price_relay_realtime_messages_dropped_total",
        "Realtime messages skipped by lagging clients"
    );
    describe_counter!(
        "price_relay_realtime_reconnects_total",
        "Reconnection attempts of the upstream realtime client"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome label for gateway requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Prices returned.
    Success,
    /// `symbols` missing or empty.
    MissingParameter,
    /// Malformed symbol.
    InvalidSymbol,
    /// Undecodable query string.
    InvalidQuery,
    /// Upstream did not answer before the timeout.
    Timeout,
    /// Upstream answered with a non-success status.
    UpstreamError,
    /// Transport or decoding failure.
    Unexpected,
}

impl GatewayOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::MissingParameter => "missing_parameter",
            Self::InvalidSymbol => "invalid_symbol",
            Self::InvalidQuery => "invalid_query",
            Self::Timeout => "timeout",
            Self::UpstreamError => "upstream_error",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Outcome label for cache lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served fresh from cache.
    Hit,
    /// Started a new fetch.
    Miss,
    /// Joined a fetch already in flight.
    Joined,
}

impl CacheOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Joined => "joined",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed gateway request.
pub fn record_gateway_request(outcome: GatewayOutcome, duration: Duration) {
    counter!(
        "price_relay_gateway_requests_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "price_relay_gateway_request_seconds",
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record one upstream fetch attempt.
pub fn record_fetch(error: Option<&FetchError>, duration: Duration) {
    histogram!("price_relay_upstream_fetch_seconds").record(duration.as_secs_f64());
    if let Some(error) = error {
        counter!(
            "price_relay_upstream_errors_total",
            "kind" => error.kind()
        )
        .increment(1);
    }
}

/// Record a cache lookup.
pub fn record_cache_lookup(outcome: CacheOutcome) {
    counter!(
        "price_relay_cache_lookups_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a scheduled fetch retry.
pub fn record_fetch_retry() {
    counter!("price_relay_fetch_retries_total").increment(1);
}

/// Update the realtime client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_realtime_clients(count: usize) {
    gauge!("price_relay_realtime_clients").set(count as f64);
}

/// Record updates published to the hub.
pub fn record_updates_published(count: u64) {
    counter!("price_relay_realtime_updates_published_total").increment(count);
}

/// Record messages a lagging client skipped.
pub fn record_messages_dropped(count: u64) {
    counter!("price_relay_realtime_messages_dropped_total").increment(count);
}

/// Record a reconnection attempt of the realtime client.
pub fn record_reconnect() {
    counter!("price_relay_realtime_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_outcome_as_str() {
        assert_eq!(GatewayOutcome::Success.as_str(), "success");
        assert_eq!(GatewayOutcome::MissingParameter.as_str(), "missing_parameter");
        assert_eq!(GatewayOutcome::Timeout.as_str(), "timeout");
        assert_eq!(GatewayOutcome::UpstreamError.as_str(), "upstream_error");
    }

    #[test]
    fn cache_outcome_as_str() {
        assert_eq!(CacheOutcome::Hit.as_str(), "hit");
        assert_eq!(CacheOutcome::Miss.as_str(), "miss");
        assert_eq!(CacheOutcome::Joined.as_str(), "joined");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_cache_lookup(CacheOutcome::Hit);
        record_fetch(Some(&FetchError::Upstream { status: 502 }), Duration::from_millis(5));
        set_realtime_clients(3);
    }
}
