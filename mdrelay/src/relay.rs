//! Relay server: WebSocket accept loop and per-connection tasks.
//!
//! Each accepted socket is split into a reader task, which feeds frames to
//! the [`Hub`], and a writer task, which drains the connection's outbound
//! channel. When either side finishes the other is aborted and the
//! connection is removed from the hub.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use mdrelay_proto::RoomId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::hub::Hub;

/// Errors that abort server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The TCP listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The bound listener could not report its local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register with the hub, which queues the `ready` greeting.
/// 2. Forward every text (or UTF-8 binary) frame to the hub.
/// 3. On close or transport error, remove the connection from the hub.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = hub.connect(tx);
    tracing::info!(conn_id = %conn_id, "connection accepted");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_hub = Arc::clone(&hub);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => reader_hub.handle_frame(conn_id, text.as_str()),
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => reader_hub.handle_frame(conn_id, text),
                    Err(_) => tracing::debug!(conn_id = %conn_id, "dropping non-UTF-8 frame"),
                },
                Message::Close(_) => {
                    tracing::debug!(conn_id = %conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the transport.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    hub.disconnect(conn_id);
    tracing::info!(conn_id = %conn_id, "connection closed");
}

/// Starts the relay on `addr` with a fresh hub using `default_room`.
///
/// # Errors
///
/// Returns [`ServerError`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
    default_room: RoomId,
) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    start_server_with_hub(addr, Arc::new(Hub::new(default_room))).await
}

/// Starts the relay with a caller-owned [`Hub`], so the caller can inspect
/// or shut down connections.
///
/// # Errors
///
/// Returns [`ServerError`] if the TCP listener cannot bind.
pub async fn start_server_with_hub(
    addr: &str,
    hub: Arc<Hub>,
) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    // Clients connect on any path.
    let app = axum::Router::new().fallback(ws_handler).with_state(hub);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a relay connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(hub): axum::extract::State<Arc<Hub>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}
