//! Price Feeder
//!
//! Polls the symbols realtime clients watch and publishes the results to the
//! [`RealtimeHub`](super::RealtimeHub).
//!
//! The watched set is the union of every client filter and the configured
//! feed symbols. Whenever it changes the running poll is replaced by one for
//! the new set. After every completed poll the cached snapshot is published;
//! the hub only fans out quotes newer than the ones it already holds.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::hub::SharedRealtimeHub;
use crate::application::services::{PollHandle, PollScheduler, PollStatus};
use crate::domain::pricing::SymbolSet;

/// Drives polls for watched symbols and publishes them to the hub.
#[derive(Debug)]
pub struct PriceFeeder {
    hub: SharedRealtimeHub,
    scheduler: PollScheduler,
    feed_symbols: SymbolSet,
}

struct ActivePoll {
    symbols: SymbolSet,
    status: watch::Receiver<PollStatus>,
    _handle: PollHandle,
}

impl PriceFeeder {
    /// Create a feeder. `feed_symbols` are polled even when no client
    /// watches them.
    #[must_use]
    pub fn new(
        hub: SharedRealtimeHub,
        scheduler: PollScheduler,
        feed_symbols: Option<SymbolSet>,
    ) -> Self {
        Self {
            hub,
            scheduler,
            feed_symbols: feed_symbols.unwrap_or_default(),
        }
    }

    /// Symbols the feeder should currently poll.
    #[must_use]
    pub fn desired_symbols(&self) -> SymbolSet {
        SymbolSet::lenient(
            self.hub
                .watched_symbols()
                .iter()
                .map(String::as_str)
                .chain(self.feed_symbols.iter()),
        )
    }

    /// Publish the cached snapshot for `symbols`. Returns the number of
    /// quotes the hub accepted.
    pub fn publish(&self, symbols: &SymbolSet) -> usize {
        let snapshot = self.scheduler.cache().snapshot(symbols);
        let accepted = self.hub.publish_snapshot(&snapshot);
        if accepted > 0 {
            tracing::debug!(symbols = %symbols, accepted, "Published polled prices");
        }
        accepted
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut active = None;
        self.resync(&mut active);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.hub.watch_changed() => self.resync(&mut active),
                polled = next_poll(&mut active) => {
                    match (polled, &active) {
                        (true, Some(poll)) => {
                            self.publish(&poll.symbols);
                        }
                        _ => active = None,
                    }
                }
            }
        }

        tracing::info!("Price feeder stopped");
    }

    fn resync(&self, active: &mut Option<ActivePoll>) {
        let desired = self.desired_symbols();
        if active.as_ref().is_some_and(|poll| poll.symbols == desired) {
            return;
        }

        // Dropping the old handle stops its loop.
        *active = self.scheduler.start(&desired).map(|handle| ActivePoll {
            status: handle.status(),
            symbols: desired.clone(),
            _handle: handle,
        });
        tracing::info!(symbols = %desired, "Feeding realtime symbols");
    }
}

/// Wait for the active poll to complete another round. Returns `false` when
/// the poll loop is gone; never resolves while nothing is polled.
async fn next_poll(active: &mut Option<ActivePoll>) -> bool {
    match active {
        Some(poll) => {
            let changed = poll.status.changed().await.is_ok();
            if changed {
                let status = poll.status.borrow_and_update();
                if let Some(error) = &status.last_error {
                    tracing::debug!(symbols = %poll.symbols, error = %error, "Feed poll failed");
                }
            }
            changed
        }
        None => std::future::pending().await,
    }
}
