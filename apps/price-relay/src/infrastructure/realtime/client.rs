//! Realtime Client
//!
//! Consumes another relay's `/realtime` stream and folds its messages into a
//! [`PriceCache`] entry.
//!
//! Reconnects with capped exponential backoff and re-sends its subscription
//! after every connect. Only symbols in the configured set are applied; an
//! empty set applies everything.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::application::services::{BackoffConfig, BackoffPolicy, PriceCache};
use crate::domain::pricing::SymbolSet;
use crate::domain::realtime::{ControlMessage, RealtimeMessage};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Realtime client errors.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Control message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the realtime client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// Connected and subscription sent.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A message changed `changed` symbols in the cache.
    Applied {
        /// Symbols whose quote changed.
        changed: usize,
    },
}

// =============================================================================
// Client
// =============================================================================

/// WebSocket consumer feeding a [`PriceCache`].
#[derive(Debug)]
pub struct RealtimeClient {
    url: Url,
    symbols: SymbolSet,
    cache: PriceCache,
    backoff: BackoffConfig,
    event_tx: mpsc::Sender<RealtimeEvent>,
    cancel: CancellationToken,
}

impl RealtimeClient {
    /// Create a client.
    #[must_use]
    pub const fn new(
        url: Url,
        symbols: SymbolSet,
        cache: PriceCache,
        backoff: BackoffConfig,
        event_tx: mpsc::Sender<RealtimeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url,
            symbols,
            cache,
            backoff,
            event_tx,
            cancel,
        }
    }

    /// Symbols this client applies.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    /// Run until cancelled, reconnecting on failure.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeClientError::MaxReconnectAttemptsExceeded`] when the
    /// backoff policy gives up.
    pub async fn run(self) -> Result<(), RealtimeClientError> {
        let mut backoff = BackoffPolicy::new(self.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Realtime client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Realtime client stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Realtime connection error");
                    let _ = self.event_tx.send(RealtimeEvent::Disconnected).await;

                    let Some(delay) = backoff.next_delay() else {
                        return Err(RealtimeClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = backoff.attempt_count();
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to realtime stream"
                    );
                    let _ = self.event_tx.send(RealtimeEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Realtime client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(&self, backoff: &mut BackoffPolicy) -> Result<(), RealtimeClientError> {
        tracing::info!(url = %self.url, "Connecting to realtime stream");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        if !self.symbols.is_empty() {
            let subscribe = ControlMessage::Subscribe {
                symbols: self.symbols.to_vec(),
            };
            write
                .send(Message::Text(serde_json::to_string(&subscribe)?.into()))
                .await?;
        }

        backoff.reset();
        tracing::info!(symbols = %self.symbols, "Connected to realtime stream");
        let _ = self.event_tx.send(RealtimeEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(RealtimeClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<RealtimeMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed realtime message");
                return;
            }
        };

        let Some(message) = self.scoped(message) else {
            return;
        };
        let changed = self.cache.apply_message(&self.symbols, &message);
        if changed > 0 {
            let _ = self.event_tx.send(RealtimeEvent::Applied { changed }).await;
        }
    }

    /// Restrict a message to the configured symbols.
    fn scoped(&self, message: RealtimeMessage) -> Option<RealtimeMessage> {
        if self.symbols.is_empty() {
            return Some(message);
        }
        match message {
            RealtimeMessage::Init { prices } => Some(RealtimeMessage::Init {
                prices: prices.filtered(&self.symbols),
            }),
            RealtimeMessage::Update { symbol, quote } => self
                .symbols
                .contains(&symbol)
                .then_some(RealtimeMessage::Update { symbol, quote }),
            RealtimeMessage::Subscribed { symbols } => {
                tracing::debug!(symbols = ?symbols, "Realtime subscription acknowledged");
                None
            }
        }
    }
}
