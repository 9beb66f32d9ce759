//! Realtime Subscription Tracking
//!
//! Tracks which symbols each realtime client wants and which symbols are
//! watched overall.
//!
//! # Design
//!
//! A client starts with no filter and receives every symbol. A `subscribe`
//! replaces its filter with an explicit set; `unsubscribe` clears it again.
//! Symbols named in any filter are reference counted so the feeder knows the
//! watched set without scanning every client:
//!
//! - refcount 0 → 1: symbol becomes watched
//! - refcount 1 → 0: symbol is no longer watched
//!
//! Clients without a filter do not contribute to the watched set.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a realtime client connection.
pub type ClientId = u64;

/// An instrument identifier.
pub type Symbol = String;

// =============================================================================
// Watch Changes
// =============================================================================

/// Changes to the overall watched symbol set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchChanges {
    /// Symbols that became watched.
    pub added: BTreeSet<Symbol>,
    /// Symbols no longer watched by anyone.
    pub removed: BTreeSet<Symbol>,
}

impl WatchChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// `None` receives every symbol.
    filters: HashMap<ClientId, Option<HashSet<Symbol>>>,
    symbol_refcount: HashMap<Symbol, usize>,
}

impl RegistryState {
    fn release(&mut self, symbols: HashSet<Symbol>, changes: &mut WatchChanges) {
        for symbol in symbols {
            if let Some(refcount) = self.symbol_refcount.get_mut(&symbol) {
                *refcount = refcount.saturating_sub(1);
                if *refcount == 0 {
                    self.symbol_refcount.remove(&symbol);
                    changes.removed.insert(symbol);
                }
            }
        }
    }

    fn retain(&mut self, symbols: &HashSet<Symbol>, changes: &mut WatchChanges) {
        for symbol in symbols {
            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                changes.added.insert(symbol.clone());
            }
        }
    }

    fn replace_filter(
        &mut self,
        client: ClientId,
        filter: Option<HashSet<Symbol>>,
    ) -> WatchChanges {
        let mut changes = WatchChanges::default();

        // Retain before release so symbols kept across the change never hit zero.
        if let Some(next) = &filter {
            self.retain(next, &mut changes);
        }
        if let Some(Some(previous)) = self.filters.insert(client, filter) {
            self.release(previous, &mut changes);
        }
        changes
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of realtime client filters.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// registry.register(1);
/// registry.register(2);
///
/// // Client 1 narrows to EUR/USD: it becomes watched
/// let changes = registry.set_symbols(1, ["EUR/USD".to_string()]);
/// assert!(changes.added.contains("EUR/USD"));
///
/// // Client 2 has no filter and still wants everything
/// assert!(registry.wants(2, "GBP/USD"));
/// assert!(!registry.wants(1, "GBP/USD"));
///
/// // Client 1 leaves: EUR/USD is no longer watched
/// let changes = registry.remove_client(1);
/// assert!(changes.removed.contains("EUR/USD"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client with no filter.
    pub fn register(&self, client: ClientId) {
        self.state.write().filters.entry(client).or_insert(None);
    }

    /// Replace a client's filter with `symbols`.
    pub fn set_symbols(
        &self,
        client: ClientId,
        symbols: impl IntoIterator<Item = Symbol>,
    ) -> WatchChanges {
        let filter: HashSet<Symbol> = symbols.into_iter().collect();
        self.state.write().replace_filter(client, Some(filter))
    }

    /// Clear a client's filter so it receives every symbol.
    pub fn clear_symbols(&self, client: ClientId) -> WatchChanges {
        self.state.write().replace_filter(client, None)
    }

    /// Forget a client, releasing its symbols.
    pub fn remove_client(&self, client: ClientId) -> WatchChanges {
        let mut state = self.state.write();
        let mut changes = WatchChanges::default();
        if let Some(Some(previous)) = state.filters.remove(&client) {
            state.release(previous, &mut changes);
        }
        changes
    }

    /// Whether `client` should receive updates for `symbol`.
    ///
    /// Unknown clients receive nothing.
    #[must_use]
    pub fn wants(&self, client: ClientId, symbol: &str) -> bool {
        match self.state.read().filters.get(&client) {
            Some(None) => true,
            Some(Some(filter)) => filter.contains(symbol),
            None => false,
        }
    }

    /// Current filter of a client, sorted. `None` means all symbols.
    #[must_use]
    pub fn client_symbols(&self, client: ClientId) -> Option<Vec<Symbol>> {
        self.state
            .read()
            .filters
            .get(&client)
            .and_then(|filter| filter.as_ref())
            .map(|filter| {
                let mut symbols: Vec<Symbol> = filter.iter().cloned().collect();
                symbols.sort();
                symbols
            })
    }

    /// Every symbol named in at least one filter, sorted.
    #[must_use]
    pub fn watched_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state.read().symbol_refcount.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            client_count: state.filters.len(),
            filtered_client_count: state.filters.values().filter(|f| f.is_some()).count(),
            symbol_count: state.symbol_refcount.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Connected clients.
    pub client_count: usize,
    /// Clients with an explicit symbol filter.
    pub filtered_client_count: usize,
    /// Unique watched symbols.
    pub symbol_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn new_client_receives_everything() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);

        assert!(registry.wants(1, "EUR/USD"));
        assert!(registry.client_symbols(1).is_none());
        assert!(registry.watched_symbols().is_empty());
    }

    #[test]
    fn unknown_client_receives_nothing() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.wants(42, "EUR/USD"));
    }

    #[test]
    fn subscribe_narrows_filter() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);

        let changes = registry.set_symbols(1, syms(&["EUR/USD"]));

        assert!(changes.added.contains("EUR/USD"));
        assert!(registry.wants(1, "EUR/USD"));
        assert!(!registry.wants(1, "GBP/USD"));
    }

    #[test]
    fn shared_symbol_is_watched_once() {
        let registry = SubscriptionRegistry::new();
        registry.set_symbols(1, syms(&["EUR/USD"]));

        let changes = registry.set_symbols(2, syms(&["EUR/USD"]));

        assert!(changes.is_empty());
        assert_eq!(registry.watched_symbols(), syms(&["EUR/USD"]));
    }

    #[test]
    fn resubscribe_replaces_filter() {
        let registry = SubscriptionRegistry::new();
        registry.set_symbols(1, syms(&["EUR/USD", "GBP/USD"]));

        let changes = registry.set_symbols(1, syms(&["GBP/USD", "USD/JPY"]));

        assert_eq!(changes.added, BTreeSet::from(["USD/JPY".to_string()]));
        assert_eq!(changes.removed, BTreeSet::from(["EUR/USD".to_string()]));
        assert_eq!(registry.watched_symbols(), syms(&["GBP/USD", "USD/JPY"]));
    }

    #[test]
    fn unsubscribe_releases_symbols_and_receives_all() {
        let registry = SubscriptionRegistry::new();
        registry.set_symbols(1, syms(&["EUR/USD"]));

        let changes = registry.clear_symbols(1);

        assert!(changes.removed.contains("EUR/USD"));
        assert!(registry.wants(1, "XAU/USD"));
        assert!(registry.watched_symbols().is_empty());
    }

    #[test]
    fn remove_client_keeps_symbols_of_others() {
        let registry = SubscriptionRegistry::new();
        registry.set_symbols(1, syms(&["EUR/USD", "GBP/USD"]));
        registry.set_symbols(2, syms(&["EUR/USD"]));

        let changes = registry.remove_client(1);

        assert_eq!(changes.removed, BTreeSet::from(["GBP/USD".to_string()]));
        assert_eq!(registry.watched_symbols(), syms(&["EUR/USD"]));
        assert!(!registry.wants(1, "EUR/USD"));
    }

    #[test]
    fn stats_count_clients_and_symbols() {
        let registry = SubscriptionRegistry::new();
        registry.register(1);
        registry.set_symbols(2, syms(&["EUR/USD", "GBP/USD"]));

        let stats = registry.stats();
        assert_eq!(stats.client_count, 2);
        assert_eq!(stats.filtered_client_count, 1);
        assert_eq!(stats.symbol_count, 2);
    }

    #[test]
    fn thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                registry.set_symbols(i, vec![format!("SYM{i}"), "EUR/USD".to_string()]);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.client_count, 10);
        assert_eq!(stats.symbol_count, 11);
    }
}
