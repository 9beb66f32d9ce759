//! Backend HTTP price source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::{UpstreamError, endpoint, transport_error};
use crate::application::ports::{FetchError, PriceSourcePort};
use crate::domain::pricing::{PriceSnapshot, SymbolSet};

/// Fetches snapshots from the price backend's `/prices` endpoint.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: Client,
    prices_url: Url,
    timeout: Duration,
}

impl HttpPriceSource {
    /// Create a source for the backend at `base_url`.
    ///
    /// `timeout` bounds each request at the HTTP client level.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot carry a path or the client fails
    /// to build.
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            prices_url: endpoint(base_url, "prices")?,
            timeout,
        })
    }

    /// Full URL of the prices endpoint.
    #[must_use]
    pub const fn prices_url(&self) -> &Url {
        &self.prices_url
    }
}

#[async_trait]
impl PriceSourcePort for HttpPriceSource {
    async fn fetch_prices(&self, symbols: &SymbolSet) -> Result<PriceSnapshot, FetchError> {
        let response = self
            .client
            .get(self.prices_url.clone())
            .query(&[("symbols", symbols.to_csv())])
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                url = %self.prices_url,
                status = status.as_u16(),
                "Price backend returned non-success status"
            );
            return Err(FetchError::Upstream {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source_for(server: &MockServer) -> HttpPriceSource {
        let base = Url::parse(&server.uri()).unwrap();
        HttpPriceSource::new(&base, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetches_snapshot_with_sorted_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .and(query_param("symbols", "EUR/USD,GBP/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "EUR/USD": {"mid_price": 1.09, "ask_price": 1.0901, "bid_price": 1.0899, "timestamp": "2025-01-01T00:00:00Z"},
                "GBP/USD": {"mid_price": 1.27, "ask_price": 1.2701, "bid_price": 1.2699, "timestamp": "2025-01-01T00:00:00Z"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let symbols = SymbolSet::parse_csv("GBP/USD,EUR/USD").unwrap();
        let snapshot = source_for(&server).fetch_prices(&symbols).await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("GBP/USD").is_some());
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
            .mount(&server)
            .await;

        let symbols = SymbolSet::parse_csv("EUR/USD").unwrap();
        let error = source_for(&server).fetch_prices(&symbols).await.unwrap_err();

        assert_eq!(error, FetchError::Upstream { status: 503 });
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let symbols = SymbolSet::parse_csv("EUR/USD").unwrap();
        let error = source_for(&server).fetch_prices(&symbols).await.unwrap_err();

        assert!(matches!(error, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn slow_backend_hits_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let source = HttpPriceSource::new(&base, Duration::from_millis(100)).unwrap();
        let symbols = SymbolSet::parse_csv("EUR/USD").unwrap();

        let error = source.fetch_prices(&symbols).await.unwrap_err();
        assert_eq!(error, FetchError::Timeout { after_ms: 100 });
    }
}
