//! Realtime Hub
//!
//! Latest-quote store plus broadcast fan-out for realtime clients.
//!
//! # Architecture
//!
//! ```text
//!  publish(symbol, quote) ──► newer than stored? ──► latest snapshot
//!                                    │
//!                                    ▼
//!                          broadcast::Sender<PriceBroadcast>
//!                           │          │          │
//!                        client 1   client 2   client N   (filtered per client)
//! ```
//!
//! Updates are serialized once and shared. A receiver that falls more than
//! `capacity` messages behind skips the missed updates; later updates and the
//! next `init` on reconnect bring it back in line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Notify, broadcast};

use crate::domain::pricing::{PriceQuote, PriceSnapshot};
use crate::domain::realtime::RealtimeMessage;
use crate::domain::subscription::{ClientId, SubscriptionRegistry, WatchChanges};
use crate::infrastructure::metrics;

/// One serialized `update` message.
#[derive(Debug, Clone)]
pub struct PriceBroadcast {
    /// Symbol the update is for.
    pub symbol: Arc<str>,
    /// JSON text of the `update` message.
    pub payload: Arc<str>,
}

/// Shared handle to the hub.
pub type SharedRealtimeHub = Arc<RealtimeHub>;

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealtimeStats {
    /// Connected clients.
    pub clients: usize,
    /// Clients with an explicit filter.
    pub filtered_clients: usize,
    /// Symbols named by at least one filter.
    pub watched_symbols: usize,
    /// Symbols with a stored quote.
    pub known_symbols: usize,
    /// Updates published since start.
    pub published: u64,
}

/// Latest quotes, client filters and the update channel.
#[derive(Debug)]
pub struct RealtimeHub {
    latest: RwLock<PriceSnapshot>,
    updates_tx: broadcast::Sender<PriceBroadcast>,
    subscriptions: SubscriptionRegistry,
    watch_changed: Notify,
    next_client_id: AtomicU64,
    clients: AtomicUsize,
    published: AtomicU64,
}

impl RealtimeHub {
    /// Create a hub whose update channel buffers `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            latest: RwLock::new(PriceSnapshot::new()),
            updates_tx: broadcast::channel(capacity.max(1)).0,
            subscriptions: SubscriptionRegistry::new(),
            watch_changed: Notify::new(),
            next_client_id: AtomicU64::new(1),
            clients: AtomicUsize::new(0),
            published: AtomicU64::new(0),
        }
    }

    /// Create a shared hub.
    #[must_use]
    pub fn shared(capacity: usize) -> SharedRealtimeHub {
        Arc::new(Self::new(capacity))
    }

    /// Store `quote` and fan it out if it is newer than the stored quote.
    ///
    /// Returns `true` if the quote was accepted.
    pub fn publish(&self, symbol: &str, quote: PriceQuote) -> bool {
        let message = RealtimeMessage::update(symbol, quote.clone());
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(symbol, error = %e, "Failed to serialize price update");
                return false;
            }
        };

        // Held across the send so a connecting client sees either the quote
        // in its init snapshot or the update on its receiver.
        let mut latest = self.latest.write();
        if !latest.apply_patch(symbol, quote) {
            return false;
        }
        let receivers = self
            .updates_tx
            .send(PriceBroadcast {
                symbol: Arc::from(symbol),
                payload: Arc::from(payload),
            })
            .unwrap_or(0);
        drop(latest);

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_updates_published(1);
        tracing::trace!(symbol, receivers, "Published price update");
        true
    }

    /// Publish every quote of `snapshot`. Returns how many were accepted.
    pub fn publish_snapshot(&self, snapshot: &PriceSnapshot) -> usize {
        snapshot
            .iter()
            .filter(|&(symbol, quote)| self.publish(symbol, quote.clone()))
            .count()
    }

    /// Register a client. The returned connection carries its `init`
    /// snapshot and update receiver, and deregisters on drop.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> RealtimeConnection {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        let latest = self.latest.read();
        let updates = self.updates_tx.subscribe();
        let init = RealtimeMessage::Init {
            prices: latest.clone(),
        };
        drop(latest);

        self.subscriptions.register(id);
        let clients = self.clients.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_realtime_clients(clients);
        tracing::debug!(client_id = id, clients, "Realtime client connected");

        RealtimeConnection {
            id,
            hub: Arc::clone(self),
            init: Some(init),
            updates,
        }
    }

    /// Replace a client's filter.
    pub fn subscribe(&self, client: ClientId, symbols: Vec<String>) -> Option<Vec<String>> {
        let changes = self.subscriptions.set_symbols(client, symbols);
        self.on_watch_changes(&changes);
        self.subscriptions.client_symbols(client)
    }

    /// Clear a client's filter.
    pub fn unsubscribe(&self, client: ClientId) {
        let changes = self.subscriptions.clear_symbols(client);
        self.on_watch_changes(&changes);
    }

    fn disconnect(&self, client: ClientId) {
        let changes = self.subscriptions.remove_client(client);
        self.on_watch_changes(&changes);
        let clients = self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_realtime_clients(clients);
        tracing::debug!(client_id = client, clients, "Realtime client disconnected");
    }

    fn on_watch_changes(&self, changes: &WatchChanges) {
        if !changes.is_empty() {
            tracing::debug!(
                added = ?changes.added,
                removed = ?changes.removed,
                "Watched symbols changed"
            );
            self.watch_changed.notify_one();
        }
    }

    /// Whether `client` wants updates for `symbol`.
    #[must_use]
    pub fn wants(&self, client: ClientId, symbol: &str) -> bool {
        self.subscriptions.wants(client, symbol)
    }

    /// Symbols named by at least one client filter.
    #[must_use]
    pub fn watched_symbols(&self) -> Vec<String> {
        self.subscriptions.watched_symbols()
    }

    /// Resolves after the watched set changed since the last call.
    pub async fn watch_changed(&self) {
        self.watch_changed.notified().await;
    }

    /// Latest stored quotes.
    #[must_use]
    pub fn latest(&self) -> PriceSnapshot {
        self.latest.read().clone()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> RealtimeStats {
        let subscriptions = self.subscriptions.stats();
        RealtimeStats {
            clients: self.clients.load(Ordering::Relaxed),
            filtered_clients: subscriptions.filtered_client_count,
            watched_symbols: subscriptions.symbol_count,
            known_symbols: self.latest.read().len(),
            published: self.published.load(Ordering::Relaxed),
        }
    }
}

/// A registered realtime client.
#[derive(Debug)]
pub struct RealtimeConnection {
    id: ClientId,
    hub: SharedRealtimeHub,
    init: Option<RealtimeMessage>,
    updates: broadcast::Receiver<PriceBroadcast>,
}

impl RealtimeConnection {
    /// Client identifier.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// The `init` message. Returns `Some` exactly once.
    pub const fn take_init(&mut self) -> Option<RealtimeMessage> {
        self.init.take()
    }

    /// Receive the next update this client wants.
    ///
    /// Returns `None` once the hub is gone.
    pub async fn next_update(&mut self) -> Option<PriceBroadcast> {
        loop {
            match self.updates.recv().await {
                Ok(update) if self.hub.wants(self.id, &update.symbol) => return Some(update),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(client_id = self.id, lagged = n, "Realtime client lagged");
                    metrics::record_messages_dropped(n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The hub this connection belongs to.
    #[must_use]
    pub const fn hub(&self) -> &SharedRealtimeHub {
        &self.hub
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}
