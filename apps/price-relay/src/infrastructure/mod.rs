//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, and the HTTP surfaces of the relay.

/// Configuration loaded from the environment.
pub mod config;

/// `GET /prices` proxy gateway and the relay HTTP server.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Realtime price channel: hub, WebSocket endpoint, feeder, client.
pub mod realtime;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Upstream price sources (HTTP backend, live-prices function).
pub mod upstream;
