//! Poll Scheduler
//!
//! Periodically drives [`PriceCache::ensure_fresh`] for a symbol set.
//!
//! The first tick fires immediately, later ticks every `interval`. Each fetch
//! is awaited before the next tick is armed, so polls for one handle never
//! overlap. While the visibility flag is `false` ticks are skipped unless
//! background polling is enabled.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::price_cache::PriceCache;
use crate::application::ports::FetchError;
use crate::domain::pricing::SymbolSet;

/// Poll configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Whether polling runs at all.
    pub enabled: bool,
    /// Time between polls.
    pub interval: Duration,
    /// Keep polling while not visible.
    pub poll_in_background: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(30_000),
            poll_in_background: false,
        }
    }
}

/// Progress of one poll loop, published after every completed poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus {
    /// Completed polls.
    pub polls: u64,
    /// Error of the most recent poll, if it failed.
    pub last_error: Option<FetchError>,
}

/// Starts poll loops against a shared [`PriceCache`].
#[derive(Debug, Clone)]
pub struct PollScheduler {
    cache: PriceCache,
    config: PollConfig,
    visibility: watch::Receiver<bool>,
}

impl PollScheduler {
    /// Create a scheduler that always considers itself visible.
    #[must_use]
    pub fn new(cache: PriceCache, config: PollConfig) -> Self {
        let (tx, visibility) = watch::channel(true);
        // Receivers keep the last value after the sender is dropped.
        drop(tx);
        Self {
            cache,
            config,
            visibility,
        }
    }

    /// Follow an external visibility flag.
    #[must_use]
    pub fn with_visibility(mut self, visibility: watch::Receiver<bool>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Poll configuration.
    #[must_use]
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// The cache polls are driven against.
    #[must_use]
    pub const fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Start polling `symbols`.
    ///
    /// Returns `None` when polling is disabled or the set is empty. The slot
    /// for `symbols` stays pinned in the cache while the handle is alive.
    #[must_use]
    pub fn start(&self, symbols: &SymbolSet) -> Option<PollHandle> {
        if !self.config.enabled || symbols.is_empty() {
            return None;
        }

        let cancel = CancellationToken::new();
        let (status_tx, status) = watch::channel(PollStatus::default());
        let task = tokio::spawn(run_poll_loop(
            self.cache.clone(),
            symbols.clone(),
            self.config.clone(),
            self.visibility.clone(),
            status_tx,
            cancel.clone(),
        ));

        tracing::debug!(
            symbols = %symbols,
            interval_ms = self.config.interval.as_millis(),
            "Started price polling"
        );
        Some(PollHandle {
            cancel,
            status,
            task: Some(task),
        })
    }
}

async fn run_poll_loop(
    cache: PriceCache,
    symbols: SymbolSet,
    config: PollConfig,
    visibility: watch::Receiver<bool>,
    status: watch::Sender<PollStatus>,
    cancel: CancellationToken,
) {
    let _subscription = cache.subscribe(&symbols);
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !config.poll_in_background && !*visibility.borrow() {
            tracing::trace!(symbols = %symbols, "Skipping poll while hidden");
            continue;
        }

        // Leaving early does not abort the fetch; the cache still applies it.
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = cache.ensure_fresh(&symbols) => {
                if let Err(error) = &result {
                    tracing::debug!(symbols = %symbols, error = %error, "Poll fetch failed");
                }
                status.send_modify(|status| {
                    status.polls += 1;
                    status.last_error = result.err();
                });
            }
        }
    }

    tracing::debug!(symbols = %symbols, "Stopped price polling");
}

/// Handle to a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    status: watch::Receiver<PollStatus>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Stop future ticks. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`PollHandle::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Receiver that changes after every completed poll.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
