//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSourcePort`: Interface for fetching a price snapshot from an
//!   upstream market-data source (the HTTP backend or the live-prices
//!   function)

mod price_source_port;

#[cfg(test)]
pub use price_source_port::MockPriceSourcePort;
pub use price_source_port::{FetchError, PriceSourcePort, SharedPriceSource};
