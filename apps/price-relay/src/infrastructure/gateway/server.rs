//! Public HTTP server: price gateway and realtime WebSocket.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::handler::{GatewayState, prices_handler};
use crate::infrastructure::realtime::{SharedRealtimeHub, realtime_handler};

/// Build the public router.
///
/// - `GET /prices` - price gateway
/// - `GET /realtime` - realtime WebSocket
pub fn router(gateway: GatewayState, hub: SharedRealtimeHub) -> Router {
    let prices = Router::new()
        .route("/prices", get(prices_handler))
        .with_state(gateway);
    let realtime = Router::new()
        .route("/realtime", get(realtime_handler))
        .with_state(hub);

    prices.merge(realtime)
}

/// Public HTTP server.
pub struct RelayServer {
    port: u16,
    router: Router,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a server for `router` on `port`.
    #[must_use]
    pub const fn new(port: u16, router: Router, cancel: CancellationToken) -> Self {
        Self {
            port,
            router,
            cancel,
        }
    }

    /// Bind `0.0.0.0:<port>` and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server stops with
    /// an I/O error.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError::ServerFailed` on a fatal I/O error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Relay server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
