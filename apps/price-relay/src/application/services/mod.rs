//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PriceCache`: Coalescing, stale-serving price cache
//! - `PollScheduler`: Periodic refresh driver with start/stop handles
//! - `BackoffPolicy`: Capped exponential backoff for retries and reconnects

pub mod backoff;
pub mod poll_scheduler;
pub mod price_cache;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use poll_scheduler::{PollConfig, PollHandle, PollScheduler, PollStatus};
pub use price_cache::{CacheStats, CacheSubscription, CacheView, PriceCache, PriceCacheConfig};
