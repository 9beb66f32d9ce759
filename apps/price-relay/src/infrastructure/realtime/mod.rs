//! Realtime Price Channel
//!
//! Push delivery of price patches over WebSocket.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`RealtimeHub`] | Latest quotes, client filters, broadcast fan-out |
//! | [`realtime_handler`] | `GET /realtime` WebSocket endpoint |
//! | [`PriceFeeder`] | Polls watched symbols and publishes them to the hub |
//! | [`RealtimeClient`] | Consumes another relay's stream into a [`PriceCache`](crate::application::services::PriceCache) |

mod client;
mod feeder;
mod hub;
mod ws;

pub use client::{RealtimeClient, RealtimeClientError, RealtimeEvent};
pub use feeder::PriceFeeder;
pub use hub::{
    PriceBroadcast, RealtimeConnection, RealtimeHub, RealtimeStats, SharedRealtimeHub,
};
pub use ws::realtime_handler;
