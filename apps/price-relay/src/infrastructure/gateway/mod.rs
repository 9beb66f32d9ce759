//! Price Gateway
//!
//! Stateless relay for `GET /prices?symbols=A,B`. Each request makes exactly
//! one upstream call raced against a hard timeout. Failures map onto a fixed
//! JSON taxonomy:
//!
//! | Failure            | Status             | Body                                            |
//! |--------------------|--------------------|-------------------------------------------------|
//! | missing `symbols`  | 400                | `{"error":"symbols parameter required"}`        |
//! | malformed symbol   | 400                | `{"error":"invalid symbol","message":..}`       |
//! | timeout            | 504                | `{"error":"Backend error","message":..}`        |
//! | upstream non-2xx   | upstream's status  | `{"error":"Backend error","message":..}`        |
//! | anything else      | 500                | `{"error":"Failed to fetch prices","message":..}` |
//!
//! Successful responses carry `Cache-Control: public, max-age=<n>`.

mod error;
mod handler;
mod server;

pub use error::GatewayError;
pub use handler::{GatewayState, GatewayStats, PricesQuery, prices_handler};
pub use server::{RelayServer, RelayServerError, router};
