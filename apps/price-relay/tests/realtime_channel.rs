//! Realtime Channel Integration Tests
//!
//! Runs the relay server on an ephemeral port and talks to `/realtime` over
//! a real WebSocket.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use price_relay::domain::realtime::fold;
use price_relay::{
    BackoffConfig, GatewayState, HttpPriceSource, PriceCache, PriceCacheConfig, PriceQuote,
    RealtimeClient, RealtimeEvent, RealtimeHub, RealtimeMessage, RelayServer, SharedRealtimeHub,
    SymbolSet, router,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: SocketAddr,
    hub: SharedRealtimeHub,
    cancel: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestServer {
    async fn start() -> Self {
        let hub = RealtimeHub::shared(64);
        // The gateway is never called in these tests.
        let backend = HttpPriceSource::new(
            &Url::parse("http://127.0.0.1:9").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        let gateway = GatewayState::new(
            Arc::new(backend),
            Duration::from_secs(1),
            Duration::from_secs(2),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = RelayServer::new(0, router(gateway, Arc::clone(&hub)), cancel.clone());
        tokio::spawn(server.serve(listener));

        Self { addr, hub, cancel }
    }

    fn url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    async fn connect(&self) -> (Socket, RealtimeMessage) {
        let (mut socket, _) = connect_async(self.url()).await.unwrap();
        let init = next_message(&mut socket).await;
        assert_eq!(init.kind(), "init");
        (socket, init)
    }
}

fn quote(mid: f64, timestamp: &str) -> PriceQuote {
    PriceQuote::new(mid, mid + 0.0002, mid - 0.0002, timestamp.to_string())
}

async fn next_message(socket: &mut Socket) -> RealtimeMessage {
    loop {
        let frame = timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let frame = timeout(Duration::from_millis(200), socket.next()).await;
    assert!(frame.is_err(), "unexpected frame: {frame:?}");
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn init_then_update_for_new_symbol_extends_state() {
    let server = TestServer::start().await;
    server
        .hub
        .publish("EUR/USD", quote(1.0845, "2025-01-15T10:30:00Z"));

    let (mut socket, init) = server.connect().await;
    let RealtimeMessage::Init { prices } = &init else {
        panic!("expected init, got {init:?}");
    };
    assert!(prices.get("EUR/USD").is_some());

    server
        .hub
        .publish("USD/JPY", quote(148.20, "2025-01-15T10:30:05Z"));
    let update = next_message(&mut socket).await;

    let state = fold([&init, &update]);
    assert!(state.get("EUR/USD").is_some());
    assert_eq!(state.get("USD/JPY").unwrap().mid_price, 148.20);
}

#[tokio::test]
async fn subscribed_client_only_receives_its_symbols() {
    let server = TestServer::start().await;
    let (mut socket, _) = server.connect().await;

    send_json(&mut socket, json!({"type": "subscribe", "symbols": ["EUR/USD"]})).await;
    assert_eq!(
        next_message(&mut socket).await,
        RealtimeMessage::Subscribed {
            symbols: Some(vec!["EUR/USD".to_string()]),
        }
    );

    server
        .hub
        .publish("GBP/USD", quote(1.2710, "2025-01-15T10:30:00Z"));
    server
        .hub
        .publish("EUR/USD", quote(1.0845, "2025-01-15T10:30:00Z"));

    let RealtimeMessage::Update { symbol, .. } = next_message(&mut socket).await else {
        panic!("expected update");
    };
    assert_eq!(symbol, "EUR/USD");
    assert_silent(&mut socket).await;
}

#[tokio::test]
async fn unsubscribe_restores_all_symbols() {
    let server = TestServer::start().await;
    let (mut socket, _) = server.connect().await;

    send_json(&mut socket, json!({"type": "subscribe", "symbols": ["EUR/USD"]})).await;
    next_message(&mut socket).await;
    send_json(&mut socket, json!({"type": "unsubscribe"})).await;
    assert_eq!(
        next_message(&mut socket).await,
        RealtimeMessage::Subscribed { symbols: None }
    );

    server
        .hub
        .publish("GBP/USD", quote(1.2710, "2025-01-15T10:30:00Z"));
    let RealtimeMessage::Update { symbol, .. } = next_message(&mut socket).await else {
        panic!("expected update");
    };
    assert_eq!(symbol, "GBP/USD");
}

#[tokio::test]
async fn older_quote_is_not_pushed() {
    let server = TestServer::start().await;
    let (mut socket, _) = server.connect().await;

    server
        .hub
        .publish("EUR/USD", quote(1.0900, "2025-01-15T10:31:00Z"));
    server
        .hub
        .publish("EUR/USD", quote(1.0800, "2025-01-15T10:30:00Z"));

    let RealtimeMessage::Update { quote, .. } = next_message(&mut socket).await else {
        panic!("expected update");
    };
    assert_eq!(quote.mid_price, 1.0900);
    assert_silent(&mut socket).await;
    assert_eq!(server.hub.latest().get("EUR/USD").unwrap().mid_price, 1.0900);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let server = TestServer::start().await;
    let (mut socket, _) = server.connect().await;

    socket
        .send(Message::Text("definitely not json".to_string().into()))
        .await
        .unwrap();
    send_json(&mut socket, json!({"type": "auth", "token": "abc"})).await;
    assert_silent(&mut socket).await;

    server
        .hub
        .publish("EUR/USD", quote(1.0845, "2025-01-15T10:30:00Z"));
    assert_eq!(next_message(&mut socket).await.kind(), "update");
}

#[tokio::test]
async fn closing_socket_deregisters_client() {
    let server = TestServer::start().await;
    let (mut socket, _) = server.connect().await;
    send_json(&mut socket, json!({"type": "subscribe", "symbols": ["EUR/USD"]})).await;
    next_message(&mut socket).await;
    assert_eq!(server.hub.stats().clients, 1);

    socket.close(None).await.unwrap();

    timeout(RECV_TIMEOUT, async {
        while server.hub.stats().clients > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client was not deregistered");
    assert!(server.hub.watched_symbols().is_empty());
}

#[tokio::test]
async fn realtime_client_feeds_cache_from_another_relay() {
    let server = TestServer::start().await;
    server
        .hub
        .publish("EUR/USD", quote(1.0845, "2025-01-15T10:30:00Z"));

    let cache = PriceCache::new(
        Arc::new(
            HttpPriceSource::new(
                &Url::parse("http://127.0.0.1:9").unwrap(),
                Duration::from_secs(1),
            )
            .unwrap(),
        ),
        PriceCacheConfig::default(),
    );
    let symbols = SymbolSet::parse_csv("EUR/USD").unwrap();
    let (event_tx, mut events) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let client = RealtimeClient::new(
        Url::parse(&server.url()).unwrap(),
        symbols.clone(),
        cache.clone(),
        BackoffConfig::reconnect(Duration::from_millis(50), Duration::from_millis(200)),
        event_tx,
        cancel.clone(),
    );
    let task = tokio::spawn(client.run());

    let mut applied = 0;
    while applied < 2 {
        match timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap() {
            RealtimeEvent::Connected => {
                while server.hub.watched_symbols().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                server
                    .hub
                    .publish("GBP/USD", quote(1.2710, "2025-01-15T10:30:01Z"));
                server
                    .hub
                    .publish("EUR/USD", quote(1.0850, "2025-01-15T10:30:02Z"));
            }
            RealtimeEvent::Applied { .. } => applied += 1,
            other => panic!("unexpected event {other:?}"),
        }
    }

    let snapshot = cache.snapshot(&symbols);
    assert_eq!(snapshot.get("EUR/USD").unwrap().mid_price, 1.0850);
    assert!(snapshot.get("GBP/USD").is_none());

    cancel.cancel();
    task.await.unwrap().unwrap();
}
