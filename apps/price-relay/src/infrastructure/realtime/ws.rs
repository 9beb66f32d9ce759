//! Realtime WebSocket Endpoint
//!
//! `GET /realtime` upgrades to a WebSocket that streams price patches.
//!
//! # Protocol
//!
//! Server to client:
//!
//! | Message | Sent |
//! |---------|------|
//! | `{"type":"init","prices":{...}}` | once, right after connect |
//! | `{"type":"update","symbol":"EUR/USD","mid_price":..,"ask_price":..,"bid_price":..,"timestamp":".."}` | per accepted quote |
//! | `{"type":"subscribed","symbols":[..]}` | after each control message |
//!
//! Client to server:
//!
//! | Message | Effect |
//! |---------|--------|
//! | `{"type":"subscribe","symbols":[..]}` | only receive updates for these symbols |
//! | `{"type":"unsubscribe"}` | receive every update again |
//!
//! Frames that do not parse as a control message are ignored.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};

use super::hub::{RealtimeConnection, SharedRealtimeHub};
use crate::domain::realtime::{ControlMessage, RealtimeMessage};

/// Upgrade handler for `GET /realtime`.
pub async fn realtime_handler(
    State(hub): State<SharedRealtimeHub>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: SharedRealtimeHub) {
    let mut connection = hub.connect();
    let client_id = connection.id();
    let (mut write, mut read) = socket.split();

    if let Some(init) = connection.take_init() {
        if let Err(e) = send_message(&mut write, &init).await {
            tracing::debug!(client_id, error = %e, "Failed to send init");
            return;
        }
    }

    loop {
        tokio::select! {
            update = connection.next_update() => {
                let Some(update) = update else {
                    break;
                };
                if let Err(e) = write.send(Message::Text(update.payload.to_string().into())).await {
                    tracing::debug!(client_id, error = %e, "Realtime send failed");
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = handle_control(&connection, text.as_str()) else {
                            continue;
                        };
                        if let Err(e) = send_message(&mut write, &reply).await {
                            tracing::debug!(client_id, error = %e, "Realtime send failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client_id, error = %e, "Realtime receive failed");
                        break;
                    }
                }
            }
        }
    }
}

/// Apply a control frame. Returns the `subscribed` acknowledgement, or
/// `None` if the frame is not a control message.
fn handle_control(connection: &RealtimeConnection, text: &str) -> Option<RealtimeMessage> {
    let control = match serde_json::from_str::<ControlMessage>(text) {
        Ok(control) => control,
        Err(e) => {
            tracing::debug!(client_id = connection.id(), error = %e, "Ignoring realtime frame");
            return None;
        }
    };

    let hub = connection.hub();
    let symbols = match control {
        ControlMessage::Subscribe { symbols } => hub.subscribe(connection.id(), symbols),
        ControlMessage::Unsubscribe => {
            hub.unsubscribe(connection.id());
            None
        }
    };

    tracing::debug!(client_id = connection.id(), symbols = ?symbols, "Realtime filter updated");
    Some(RealtimeMessage::Subscribed { symbols })
}

async fn send_message<S>(write: &mut S, message: &RealtimeMessage) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    write.send(Message::Text(text.into())).await
}
