#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Relay - Live Forex Price Proxy and Realtime Fan-out
//!
//! Fronts an upstream price backend with a hard-timeout HTTP gateway, a
//! coalescing price cache driven by poll schedulers, and a WebSocket channel
//! that pushes per-symbol price patches to connected clients.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `pricing`: Symbol sets, quotes, snapshots
//!   - `realtime`: `init` / `update` / control messages
//!   - `subscription`: Per-client symbol filters
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The price source interface
//!   - `services`: Price cache, poll scheduler, backoff
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: HTTP backend and live-prices function clients
//!   - `gateway`: `GET /prices` proxy
//!   - `realtime`: Hub, `GET /realtime`, feeder, upstream client
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                  GET /prices ──► Gateway ──(8s timeout)──► Backend
//!
//!  PriceFeeder ──► PollScheduler ──► PriceCache ──► PriceSource
//!       │                               ▲
//!       ▼                               │ patches
//!  RealtimeHub ──► GET /realtime    RealtimeClient ◄── other relay
//!       │
//!       ├──► client 1  (all symbols)
//!       └──► client N  (subscribed symbols)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Price types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pricing::{PriceQuote, PriceSnapshot, SymbolError, SymbolSet};
pub use domain::realtime::{ControlMessage, RealtimeMessage};
pub use domain::subscription::{ClientId, SubscriptionRegistry, SubscriptionStats};

// Ports and services
pub use application::ports::{FetchError, PriceSourcePort, SharedPriceSource};
pub use application::services::{
    BackoffConfig, BackoffPolicy, CacheView, PollConfig, PollHandle, PollScheduler, PriceCache,
    PriceCacheConfig,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// HTTP surfaces (for integration tests)
pub use infrastructure::gateway::{GatewayError, GatewayState, RelayServer, router};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::realtime::{
    PriceFeeder, RealtimeClient, RealtimeEvent, RealtimeHub, SharedRealtimeHub,
};

// Upstream sources
pub use infrastructure::upstream::{HttpPriceSource, LivePricesFunction};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
