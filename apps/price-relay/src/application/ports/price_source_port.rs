//! Price Source Port (Driven Port)
//!
//! Interface for fetching the latest quotes for a symbol set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::pricing::{PriceSnapshot, SymbolSet};

/// Price source error.
///
/// `Clone` so one failed fetch can be handed to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The source did not answer in time.
    #[error("price source timed out after {after_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        after_ms: u64,
    },

    /// The source answered with a non-success status.
    #[error("upstream returned {status}")]
    Upstream {
        /// HTTP status code.
        status: u16,
    },

    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// The response body was not a price snapshot.
    #[error("invalid price payload: {message}")]
    Decode {
        /// Error details.
        message: String,
    },

    /// The live-prices function reported an error.
    #[error("live prices function failed: {message}")]
    Function {
        /// Message reported by the function.
        message: String,
    },
}

impl FetchError {
    /// Whether another attempt may succeed.
    ///
    /// Client errors other than 408 and 429 are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status } => {
                !matches!(*status, 400..=499) || *status == 408 || *status == 429
            }
            Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::Decode { .. }
            | Self::Function { .. } => true,
        }
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Transport { .. } => "transport",
            Self::Decode { .. } => "decode",
            Self::Function { .. } => "function",
        }
    }
}

/// Port for fetching price snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSourcePort: Send + Sync {
    /// Fetch the latest quotes for `symbols`.
    ///
    /// One call is one upstream request; retry policy belongs to the caller.
    async fn fetch_prices(&self, symbols: &SymbolSet) -> Result<PriceSnapshot, FetchError>;
}

/// Shared handle to a price source.
pub type SharedPriceSource = Arc<dyn PriceSourcePort>;
