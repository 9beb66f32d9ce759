//! Live-prices function source.
//!
//! The function answers `{ "prices": { "EUR/USD": 1.0912 } }` and reports
//! failures as `{ "error": "..." }` or `{ "message": "..." }`. It only knows
//! one price per symbol, so quotes are built with mid, ask and bid equal and
//! stamped with the receive time.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{UpstreamError, endpoint, transport_error};
use crate::application::ports::{FetchError, PriceSourcePort};
use crate::domain::pricing::{PriceQuote, PriceSnapshot, SymbolSet};
use crate::infrastructure::config::FunctionKey;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    symbols: Vec<&'a str>,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    prices: BTreeMap<String, f64>,
    error: Option<String>,
    message: Option<String>,
}

/// Invokes the `get-live-prices` function.
#[derive(Debug, Clone)]
pub struct LivePricesFunction {
    client: Client,
    invoke_url: Url,
    key: Option<FunctionKey>,
    timeout: Duration,
}

impl LivePricesFunction {
    /// Create a client for the functions endpoint at `functions_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot carry a path or the client fails
    /// to build.
    pub fn new(
        functions_url: &Url,
        key: Option<FunctionKey>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            invoke_url: endpoint(functions_url, "get-live-prices")?,
            key,
            timeout,
        })
    }

    /// Full URL of the function.
    #[must_use]
    pub const fn invoke_url(&self) -> &Url {
        &self.invoke_url
    }
}

#[async_trait]
impl PriceSourcePort for LivePricesFunction {
    async fn fetch_prices(&self, symbols: &SymbolSet) -> Result<PriceSnapshot, FetchError> {
        let mut request = self.client.post(self.invoke_url.clone()).json(&InvokeRequest {
            symbols: symbols.iter().collect(),
        });
        if let Some(key) = &self.key {
            request = request.bearer_auth(key.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let parsed = serde_json::from_slice::<InvokeResponse>(&body);

        if !status.is_success() {
            // Rate limits stay retryable; other failures surface the function's message.
            return Err(match parsed {
                Ok(InvokeResponse { error, message, .. }) if status.as_u16() != 429 => {
                    error.or(message).map_or(
                        FetchError::Upstream {
                            status: status.as_u16(),
                        },
                        |message| FetchError::Function { message },
                    )
                }
                _ => FetchError::Upstream {
                    status: status.as_u16(),
                },
            });
        }

        let parsed = parsed.map_err(|e| FetchError::Decode {
            message: e.to_string(),
        })?;
        if let Some(message) = parsed.error.or(parsed.message) {
            return Err(FetchError::Function { message });
        }

        let observed_at = Utc::now();
        Ok(parsed
            .prices
            .into_iter()
            .map(|(symbol, price)| (symbol, PriceQuote::from_price(price, observed_at)))
            .collect())
    }
}
