//! Realtime WebSocket transport
//!
//! Each socket gets a gateway connection. A writer task drains the
//! connection's outbox onto the socket while the reader loop feeds text
//! frames to [`handlers::handle_text`].

pub mod gateway;
pub mod handlers;
pub mod protocol;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::server::state::AppState;

pub use gateway::{Channel, Connection, ConnectionId, Gateway, Outbox};
pub use protocol::{ClientEvent, ServerEvent};

/// Keepalive ping period
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection, mut outbox) = state.gateway.register();
    let conn_id = connection.id;
    state.metrics.ws_connections_active.inc();
    info!(conn_id = %conn_id, "Client connected");

    let writer = tokio::spawn(async move {
        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handlers::handle_text(&state, &connection, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handlers::handle_text(&state, &connection, text).await,
                Err(_) => debug!(conn_id = %conn_id, "Ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            // Pongs are answered by axum
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Sessions survive the socket; only the connection goes away
    state.gateway.unregister(&conn_id);
    writer.abort();
    state.metrics.ws_connections_active.dec();
    info!(
        conn_id = %conn_id,
        session_id = connection.session_id().as_deref().unwrap_or("-"),
        "Client disconnected"
    );
}
