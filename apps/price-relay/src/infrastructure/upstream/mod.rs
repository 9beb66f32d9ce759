//! Upstream Price Sources
//!
//! `PriceSourcePort` adapters over HTTP:
//!
//! - `HttpPriceSource`: `GET {backend}/prices?symbols=A,B` returning a
//!   price snapshot object
//! - `LivePricesFunction`: `POST {functions}/get-live-prices` returning
//!   `{ "prices": { "<symbol>": <number> } }`

mod function;
mod http;

use std::time::Duration;

use url::Url;

use crate::application::ports::FetchError;

pub use function::LivePricesFunction;
pub use http::HttpPriceSource;

/// Error building an upstream client.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Base URL cannot carry a path.
    #[error("base URL cannot be extended with a path: {0}")]
    InvalidBaseUrl(String),
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Append `segment` to the path of `base`, keeping any existing prefix.
pub(crate) fn endpoint(base: &Url, segment: &str) -> Result<Url, UpstreamError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| UpstreamError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Map a reqwest failure that produced no usable response.
pub(crate) fn transport_error(error: &reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if error.is_decode() {
        FetchError::Decode {
            message: error.to_string(),
        }
    } else {
        FetchError::Transport {
            message: error.to_string(),
        }
    }
}
