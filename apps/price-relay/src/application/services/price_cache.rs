//! Price Cache
//!
//! Keyed, time-bounded cache of price snapshots with request coalescing,
//! capped exponential retry and stale-serve on failure.
//!
//! # Design
//!
//! ```text
//!  ensure_fresh(set) ──► fresh? ──yes──► cached snapshot
//!                           │no
//!                           ▼
//!                   in-flight fetch for key? ──yes──► join it
//!                           │no
//!                           ▼
//!                 spawn fetch (with retries) ──► apply result to slot
//! ```
//!
//! - Entries are keyed by [`SymbolSet::cache_key`], so `{A,B}` and `{B,A}`
//!   share one entry and one in-flight fetch.
//! - A fetch runs as a spawned task behind a shared future. Callers that give
//!   up waiting do not cancel it and its result is always applied.
//! - A failed fetch keeps the previous snapshot and records the error. A
//!   successful one replaces the snapshot, clears the error and resets the
//!   staleness clock.
//! - Realtime patches go into the same slot, per symbol, highest timestamp
//!   wins. They do not reset the staleness clock.
//! - Slots nobody observes are evicted after the retention window. A live
//!   [`CacheSubscription`] pins its slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use crate::application::ports::{FetchError, SharedPriceSource};
use crate::domain::pricing::{PriceQuote, PriceSnapshot, SymbolSet};
use crate::domain::realtime::RealtimeMessage;
use crate::infrastructure::metrics::{self, CacheOutcome};

type FetchResult = Result<PriceSnapshot, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

// =============================================================================
// Configuration
// =============================================================================

/// Price cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCacheConfig {
    /// Poll interval the cache is tuned for. Entries go stale after half of it.
    pub poll_interval: Duration,
    /// How long an unobserved slot survives before garbage collection.
    pub retention: Duration,
    /// Retry schedule for failed fetches.
    pub retry: BackoffConfig,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(30_000),
            retention: Duration::from_secs(60),
            retry: BackoffConfig::default(),
        }
    }
}

impl PriceCacheConfig {
    /// Age at which an entry is considered stale.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.poll_interval / 2
    }
}

// =============================================================================
// Views
// =============================================================================

/// Read-only view of one cache slot.
///
/// Distinguishes "no data yet" (`fetched_at` is `None`) from "stale data,
/// last refresh failed" (`is_degraded`).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheView {
    /// Latest known quotes. Empty if nothing was fetched or pushed.
    pub snapshot: PriceSnapshot,
    /// When the last successful fetch completed.
    pub fetched_at: Option<Instant>,
    /// Age after which the entry is stale.
    pub stale_after: Duration,
    /// Error from the last fetch, cleared on success.
    pub error: Option<FetchError>,
    /// Whether a fetch is currently running.
    pub is_fetching: bool,
}

impl CacheView {
    /// Whether the slot holds any quotes.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.snapshot.is_empty()
    }

    /// Serving data while the last refresh failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.has_data() && self.error.is_some()
    }

    /// Whether the entry needs a fetch at `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: Instant) -> bool {
        self.fetched_at
            .is_none_or(|fetched_at| now.saturating_duration_since(fetched_at) >= self.stale_after)
    }
}

/// Cache-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Slots currently held.
    pub entries: usize,
    /// Slots with a fetch running.
    pub in_flight: usize,
    /// Slots pinned by at least one subscription.
    pub observed: usize,
}

// =============================================================================
// Slot State
// =============================================================================

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

struct Slot {
    snapshot: PriceSnapshot,
    fetched_at: Option<Instant>,
    error: Option<FetchError>,
    in_flight: Option<InFlight>,
    observers: usize,
    last_access: Instant,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            snapshot: PriceSnapshot::new(),
            fetched_at: None,
            error: None,
            in_flight: None,
            observers: 0,
            last_access: now,
        }
    }

    fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        self.fetched_at
            .is_some_and(|fetched_at| now.saturating_duration_since(fetched_at) < stale_after)
    }

    fn view(&self, stale_after: Duration) -> CacheView {
        CacheView {
            snapshot: self.snapshot.clone(),
            fetched_at: self.fetched_at,
            stale_after,
            error: self.error.clone(),
            is_fetching: self.in_flight.is_some(),
        }
    }
}

struct Inner {
    source: SharedPriceSource,
    config: PriceCacheConfig,
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl Inner {
    async fn fetch_with_retry(&self, symbols: &SymbolSet) -> FetchResult {
        let mut backoff = BackoffPolicy::new(self.config.retry.clone());

        loop {
            let started = Instant::now();
            let result = self.source.fetch_prices(symbols).await;
            metrics::record_fetch(result.as_ref().err(), started.elapsed());

            match result {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) if error.is_retryable() => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(error);
                    };
                    tracing::warn!(
                        symbols = %symbols,
                        attempt = backoff.attempt_count(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Price fetch failed, retrying"
                    );
                    metrics::record_fetch_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn complete(&self, key: &str, generation: u64, result: &FetchResult) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };

        match result {
            Ok(fetched) => {
                slot.snapshot = slot.snapshot.replaced_by(fetched.clone());
                slot.fetched_at = Some(Instant::now());
                slot.error = None;
            }
            Err(error) => {
                slot.error = Some(error.clone());
            }
        }

        if slot
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            slot.in_flight = None;
        }
    }
}

// =============================================================================
// Price Cache
// =============================================================================

/// Coalescing price cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PriceCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PriceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PriceCache {
    /// Create a cache over `source`.
    #[must_use]
    pub fn new(source: SharedPriceSource, config: PriceCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Cache configuration.
    #[must_use]
    pub fn config(&self) -> &PriceCacheConfig {
        &self.inner.config
    }

    /// Current snapshot for `symbols`, empty if nothing is known. Never
    /// suspends and never fetches.
    #[must_use]
    pub fn snapshot(&self, symbols: &SymbolSet) -> PriceSnapshot {
        let key = symbols.cache_key();
        let mut slots = self.inner.slots.lock();
        slots.get_mut(&key).map_or_else(PriceSnapshot::new, |slot| {
            slot.last_access = Instant::now();
            slot.snapshot.clone()
        })
    }

    /// Full view of the slot for `symbols`.
    #[must_use]
    pub fn view(&self, symbols: &SymbolSet) -> CacheView {
        let stale_after = self.inner.config.stale_after();
        let key = symbols.cache_key();
        let mut slots = self.inner.slots.lock();
        match slots.get_mut(&key) {
            Some(slot) => {
                slot.last_access = Instant::now();
                slot.view(stale_after)
            }
            None => Slot::new(Instant::now()).view(stale_after),
        }
    }

    /// Serve fresh data, fetching only if the entry is absent or stale.
    ///
    /// Concurrent callers for the same key share one fetch.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after retries are exhausted. The previous
    /// snapshot stays readable through [`PriceCache::view`].
    pub async fn ensure_fresh(&self, symbols: &SymbolSet) -> Result<PriceSnapshot, FetchError> {
        let fetch = {
            let key = symbols.cache_key();
            let now = Instant::now();
            let stale_after = self.inner.config.stale_after();
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
            slot.last_access = now;

            if slot.is_fresh(now, stale_after) {
                metrics::record_cache_lookup(CacheOutcome::Hit);
                tracing::trace!(key = %key, "Price cache hit");
                return Ok(slot.snapshot.clone());
            }
            self.start_or_join(&key, slot, symbols)
        };

        fetch.await
    }

    /// Fetch now regardless of freshness, joining a fetch already running.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after retries are exhausted.
    pub async fn refresh(&self, symbols: &SymbolSet) -> Result<PriceSnapshot, FetchError> {
        let fetch = {
            let key = symbols.cache_key();
            let now = Instant::now();
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
            slot.last_access = now;
            self.start_or_join(&key, slot, symbols)
        };

        fetch.await
    }

    fn start_or_join(&self, key: &str, slot: &mut Slot, symbols: &SymbolSet) -> SharedFetch {
        if let Some(in_flight) = &slot.in_flight {
            metrics::record_cache_lookup(CacheOutcome::Joined);
            tracing::debug!(key = %key, "Joining in-flight price fetch");
            return in_flight.fetch.clone();
        }

        metrics::record_cache_lookup(CacheOutcome::Miss);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let task_symbols = symbols.clone();

        let handle: JoinHandle<FetchResult> = tokio::spawn(async move {
            let started = Instant::now();
            let result = inner.fetch_with_retry(&task_symbols).await;
            inner.complete(&task_key, generation, &result);

            match &result {
                Ok(snapshot) => tracing::debug!(
                    key = %task_key,
                    quotes = snapshot.len(),
                    latency_ms = started.elapsed().as_millis(),
                    "Price fetch completed"
                ),
                Err(error) => tracing::warn!(
                    key = %task_key,
                    error = %error,
                    "Price fetch failed, serving previous snapshot"
                ),
            }
            result
        });

        let fetch = async move {
            handle.await.unwrap_or_else(|e| {
                Err(FetchError::Transport {
                    message: format!("fetch task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        fetch
    }

    /// Patch one symbol of the slot for `symbols`.
    ///
    /// Returns `true` if the quote was newer than the cached one.
    pub fn apply_update(&self, symbols: &SymbolSet, symbol: &str, quote: PriceQuote) -> bool {
        let key = symbols.cache_key();
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(key).or_insert_with(|| Slot::new(now));
        slot.snapshot.apply_patch(symbol, quote)
    }

    /// Apply a realtime message to the slot for `symbols` as patches.
    ///
    /// Returns the number of symbols that changed.
    pub fn apply_message(&self, symbols: &SymbolSet, message: &RealtimeMessage) -> usize {
        let key = symbols.cache_key();
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(key).or_insert_with(|| Slot::new(now));
        message.apply_to(&mut slot.snapshot)
    }

    /// Pin the slot for `symbols` until the guard is dropped.
    #[must_use]
    pub fn subscribe(&self, symbols: &SymbolSet) -> CacheSubscription {
        let key = symbols.cache_key();
        let now = Instant::now();
        {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
            slot.observers += 1;
            slot.last_access = now;
        }
        CacheSubscription {
            inner: Arc::clone(&self.inner),
            key,
        }
    }

    /// Evict slots that are unobserved, idle and older than the retention
    /// window. Returns the number of evicted slots.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let retention = self.inner.config.retention;
        let mut slots = self.inner.slots.lock();
        let before = slots.len();

        slots.retain(|_, slot| {
            slot.observers > 0
                || slot.in_flight.is_some()
                || now.saturating_duration_since(slot.last_access) <= retention
        });

        let evicted = before - slots.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = slots.len(), "Evicted idle price cache entries");
        }
        evicted
    }

    /// Run [`PriceCache::collect_garbage`] every `period` until cancelled.
    #[must_use]
    pub fn spawn_gc(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.collect_garbage();
                    }
                }
            }
        })
    }

    /// Cache-wide counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let slots = self.inner.slots.lock();
        CacheStats {
            entries: slots.len(),
            in_flight: slots.values().filter(|s| s.in_flight.is_some()).count(),
            observed: slots.values().filter(|s| s.observers > 0).count(),
        }
    }
}

// =============================================================================
// Subscription Guard
// =============================================================================

/// Keeps a cache slot alive. Dropping it restarts the retention clock.
#[derive(Debug)]
pub struct CacheSubscription {
    inner: Arc<Inner>,
    key: String,
}

impl CacheSubscription {
    /// Cache key this guard pins.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.observers = slot.observers.saturating_sub(1);
            slot.last_access = Instant::now();
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
