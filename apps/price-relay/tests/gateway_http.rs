//! Price Gateway Integration Tests
//!
//! Drives `GET /prices` through the public router against a mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use price_relay::{GatewayState, HttpPriceSource, RealtimeHub, router};

fn prices_body() -> Value {
    json!({
        "EUR/USD": {
            "mid_price": 1.0845,
            "ask_price": 1.0846,
            "bid_price": 1.0844,
            "timestamp": "2025-01-15T10:30:00Z"
        },
        "GBP/USD": {
            "mid_price": 1.2710,
            "ask_price": 1.2712,
            "bid_price": 1.2708,
            "timestamp": "2025-01-15T10:30:00Z"
        }
    })
}

fn gateway(server: &MockServer, timeout: Duration) -> GatewayState {
    let url = Url::parse(&server.uri()).unwrap();
    // Client timeout above the gateway's own so the gateway timer decides.
    let source = HttpPriceSource::new(&url, Duration::from_secs(5)).unwrap();
    GatewayState::new(Arc::new(source), timeout, Duration::from_secs(2))
}

async fn get(gateway: GatewayState, uri: &str) -> Response {
    router(gateway, RealtimeHub::shared(16))
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn success_returns_all_requested_symbols_with_cache_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("symbols", "EUR/USD,GBP/USD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prices_body()))
        .expect(1)
        .mount(&server)
        .await;

    let response = get(
        gateway(&server, Duration::from_secs(8)),
        "/prices?symbols=GBP/USD,EUR/USD",
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=2"
    );
    let body = json_body(response).await;
    for symbol in ["EUR/USD", "GBP/USD"] {
        let quote = &body[symbol];
        for field in ["mid_price", "ask_price", "bid_price", "timestamp"] {
            assert!(!quote[field].is_null(), "{symbol} missing {field}");
        }
    }
}

#[tokio::test]
async fn slow_backend_times_out_with_504() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(prices_body())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let gateway = gateway(&server, Duration::from_millis(100));
    let stats = gateway.stats();
    let response = get(gateway, "/prices?symbols=EUR/USD").await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Backend error");
    assert_eq!(stats.consecutive_failures(), 1);
}

#[tokio::test]
async fn missing_symbols_is_rejected_without_calling_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prices_body()))
        .expect(0)
        .mount(&server)
        .await;

    for uri in ["/prices", "/prices?symbols=", "/prices?symbols=,,"] {
        let response = get(gateway(&server, Duration::from_secs(8)), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(
            json_body(response).await,
            json!({ "error": "symbols parameter required" })
        );
    }
}

#[tokio::test]
async fn undecodable_query_is_a_json_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prices_body()))
        .expect(0)
        .mount(&server)
        .await;

    let response = get(
        gateway(&server, Duration::from_secs(8)),
        "/prices?symbols=EUR/USD&symbols=GBP/USD",
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid query");
    assert!(body["message"].as_str().unwrap().contains("symbols"));
}

#[tokio::test]
async fn invalid_symbol_is_rejected() {
    let server = MockServer::start().await;
    let response = get(
        gateway(&server, Duration::from_secs(8)),
        "/prices?symbols=EUR/USD,%3Cscript%3E",
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid symbol");
}

#[tokio::test]
async fn upstream_status_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let response = get(
        gateway(&server, Duration::from_secs(8)),
        "/prices?symbols=EUR/USD",
    )
    .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Backend error");
    assert_eq!(body["message"], "upstream returned 503");
}

#[tokio::test]
async fn undecodable_backend_body_is_a_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let response = get(
        gateway(&server, Duration::from_secs(8)),
        "/prices?symbols=EUR/USD",
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "Failed to fetch prices");
}

#[tokio::test]
async fn success_resets_consecutive_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prices_body()))
        .mount(&server)
        .await;

    let gateway = gateway(&server, Duration::from_secs(8));
    let stats = gateway.stats();

    for _ in 0..2 {
        let response = get(gateway.clone(), "/prices?symbols=EUR/USD").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
    assert_eq!(stats.consecutive_failures(), 2);

    let response = get(gateway, "/prices?symbols=EUR/USD").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stats.consecutive_failures(), 0);
    assert_eq!(stats.requests(), 3);
    assert!(stats.last_success().is_some());
}
