//! Realtime Wire Messages
//!
//! JSON messages exchanged on the realtime WebSocket channel. Every message is
//! an object tagged by its `type` field.
//!
//! Server to client:
//!
//! ```text
//! {"type":"init","prices":{"EUR/USD":{"mid_price":..,"ask_price":..,"bid_price":..,"timestamp":".."}}}
//! {"type":"update","symbol":"EUR/USD","mid_price":..,"ask_price":..,"bid_price":..,"timestamp":".."}
//! {"type":"subscribed","symbols":["EUR/USD"]}      // or null after unsubscribe
//! ```
//!
//! Client to server:
//!
//! ```text
//! {"type":"subscribe","symbols":["EUR/USD","GBP/USD"]}
//! {"type":"unsubscribe"}
//! ```
//!
//! A connection receives exactly one `init` first. `update` messages are
//! single-symbol patches; folding them over the `init` snapshot yields the
//! current state.

use serde::{Deserialize, Serialize};

use crate::domain::pricing::{PriceQuote, PriceSnapshot};

/// Message pushed by the realtime hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RealtimeMessage {
    /// Full snapshot sent once when a connection opens.
    Init {
        /// Latest known quote per symbol.
        prices: PriceSnapshot,
    },
    /// Single-symbol patch.
    Update {
        /// Symbol the quote belongs to.
        symbol: String,
        /// The new quote, flattened into the message object.
        #[serde(flatten)]
        quote: PriceQuote,
    },
    /// Acknowledges a subscription change. `None` means all symbols.
    Subscribed {
        /// Active filter after the change.
        symbols: Option<Vec<String>>,
    },
}

impl RealtimeMessage {
    /// Build an `update` message.
    #[must_use]
    pub fn update(symbol: impl Into<String>, quote: PriceQuote) -> Self {
        Self::Update {
            symbol: symbol.into(),
            quote,
        }
    }

    /// Message type name as it appears on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Update { .. } => "update",
            Self::Subscribed { .. } => "subscribed",
        }
    }

    /// Apply this message to `snapshot` as per-symbol patches.
    ///
    /// `init` patches every symbol it carries and `update` patches one.
    /// Older quotes never overwrite newer ones. Returns the number of
    /// symbols that changed.
    pub fn apply_to(&self, snapshot: &mut PriceSnapshot) -> usize {
        match self {
            Self::Init { prices } => prices
                .iter()
                .filter(|&(symbol, quote)| snapshot.apply_patch(symbol, quote.clone()))
                .count(),
            Self::Update { symbol, quote } => usize::from(snapshot.apply_patch(symbol, quote.clone())),
            Self::Subscribed { .. } => 0,
        }
    }
}

/// Fold a message sequence into the state it describes.
#[must_use]
pub fn fold<'a, I>(messages: I) -> PriceSnapshot
where
    I: IntoIterator<Item = &'a RealtimeMessage>,
{
    let mut snapshot = PriceSnapshot::new();
    for message in messages {
        message.apply_to(&mut snapshot);
    }
    snapshot
}

/// Message sent by a realtime client to change its filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Replace the filter with these symbols.
    Subscribe {
        /// Symbols to receive updates for.
        symbols: Vec<String>,
    },
    /// Drop the filter and receive every symbol.
    Unsubscribe,
}
