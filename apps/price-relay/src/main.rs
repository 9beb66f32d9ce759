//! Price Relay Binary
//!
//! Starts the price gateway, the realtime channel and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Servers
//! - `PRICE_RELAY_HTTP_PORT`: Gateway and realtime port (default: 8080)
//! - `PRICE_RELAY_HEALTH_PORT`: Health and metrics port (default: 8082)
//!
//! ## Upstream
//! - `PRICE_BACKEND_URL`: Price backend base URL
//! - `PRICE_BACKEND_TIMEOUT_MS`: Per-request upstream timeout (default: 8000)
//! - `PRICE_CACHE_MAX_AGE_SECS`: `Cache-Control` max-age (default: 2)
//! - `PRICE_FUNCTIONS_URL` / `PRICE_FUNCTIONS_KEY`: Live-prices function used by the feeder
//!
//! ## Cache and polling
//! - `PRICE_POLL_ENABLED`: Run the feeder poll loop (default: true)
//! - `PRICE_RETRY_COUNT`, `PRICE_RETRY_BASE_DELAY_MS`, `PRICE_RETRY_MAX_DELAY_MS`
//! - `PRICE_CACHE_RETENTION_SECS`
//!
//! ## Realtime
//! - `PRICE_REALTIME_CAPACITY`: Update buffer per client (default: 10000)
//! - `PRICE_FEED_INTERVAL_MS`: Feeder poll interval (default: 10000)
//! - `PRICE_FEED_SYMBOLS`: Symbols always fed, comma-separated
//! - `PRICE_REALTIME_UPSTREAM_URL`: Another relay's `/realtime` to consume
//! - `PRICE_RECONNECT_DELAY_INITIAL_MS`, `PRICE_RECONNECT_DELAY_MAX_MS`
//!
//! ## Observability
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_relay::application::ports::SharedPriceSource;
use price_relay::infrastructure::gateway::{GatewayState, RelayServer, router};
use price_relay::infrastructure::health::{HealthServer, HealthServerState};
use price_relay::infrastructure::realtime::{
    PriceFeeder, RealtimeClient, RealtimeEvent, RealtimeHub, SharedRealtimeHub,
};
use price_relay::infrastructure::telemetry;
use price_relay::infrastructure::upstream::{HttpPriceSource, LivePricesFunction};
use price_relay::{PollScheduler, PriceCache, RelayConfig, SymbolSet, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fails only if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream sources
    let backend: SharedPriceSource =
        Arc::new(HttpPriceSource::new(&config.backend.url, config.backend.timeout)?);
    let feed_source: SharedPriceSource = match &config.function {
        Some(function) => Arc::new(LivePricesFunction::new(
            &function.url,
            function.key.clone(),
            config.backend.timeout,
        )?),
        None => Arc::clone(&backend),
    };

    // Cache, hub and feeder
    let feed_cache = PriceCache::new(
        feed_source,
        config.realtime.feed_cache_config(&config.cache),
    );
    let gc_handle = feed_cache.spawn_gc(config.cache.retention, shutdown_token.clone());

    let hub = RealtimeHub::shared(config.realtime.capacity);
    let scheduler = PollScheduler::new(
        feed_cache.clone(),
        config.realtime.feed_poll_config(&config.cache),
    );
    let feeder = PriceFeeder::new(
        Arc::clone(&hub),
        scheduler,
        config.realtime.feed_symbols.clone(),
    );
    let feeder_handle = tokio::spawn(feeder.run(shutdown_token.clone()));

    if let Some(url) = config.realtime.upstream_url.clone() {
        let symbols = config.realtime.feed_symbols.clone().unwrap_or_default();
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(256);
        let client = RealtimeClient::new(
            url,
            symbols.clone(),
            feed_cache.clone(),
            config.realtime.reconnect_backoff(),
            event_tx,
            shutdown_token.clone(),
        );

        let event_hub = Arc::clone(&hub);
        let event_cache = feed_cache.clone();
        tokio::spawn(async move {
            handle_realtime_events(event_rx, event_hub, event_cache, symbols).await;
        });
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(error = %e, "Realtime client error");
            }
        });
    }

    // Public server
    let gateway = GatewayState::new(
        backend,
        config.backend.timeout,
        config.backend.cache_max_age,
    );
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        gateway.stats(),
        feed_cache.clone(),
        Arc::clone(&hub),
    ));
    let relay_server = RelayServer::new(
        config.server.http_port,
        router(gateway, Arc::clone(&hub)),
        shutdown_token.clone(),
    );
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let relay_cancel = shutdown_token.clone();
    let relay_handle = tokio::spawn(async move {
        if let Err(e) = relay_server.run().await {
            tracing::error!(error = %e, "Relay server error");
            relay_cancel.cancel();
        }
    });

    tracing::info!("Price relay ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = relay_handle.await;
        let _ = feeder_handle.await;
        let _ = gc_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Graceful shutdown timed out");
    }

    tracing::info!("Price relay stopped");
    Ok(())
}

/// Forward prices applied by the realtime client to the hub.
async fn handle_realtime_events(
    mut rx: mpsc::Receiver<RealtimeEvent>,
    hub: SharedRealtimeHub,
    cache: PriceCache,
    symbols: SymbolSet,
) {
    while let Some(event) = rx.recv().await {
        match event {
            RealtimeEvent::Connected => {
                tracing::info!("Realtime upstream connected");
            }
            RealtimeEvent::Disconnected => {
                tracing::warn!("Realtime upstream disconnected");
            }
            RealtimeEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Realtime upstream reconnecting");
            }
            RealtimeEvent::Applied { changed } => {
                let published = hub.publish_snapshot(&cache.snapshot(&symbols));
                tracing::trace!(changed, published, "Relayed upstream prices");
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        backend_url = %config.backend.url,
        backend_timeout_ms = config.backend.timeout.as_millis(),
        feed_interval_ms = config.realtime.feed_interval.as_millis(),
        "Configuration loaded"
    );
    tracing::debug!(
        feed_symbols = ?config.realtime.feed_symbols.as_ref().map(ToString::to_string),
        realtime_upstream = ?config.realtime.upstream_url.as_ref().map(ToString::to_string),
        function = ?config.function.as_ref().map(|f| f.url.to_string()),
        "Realtime sources"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
