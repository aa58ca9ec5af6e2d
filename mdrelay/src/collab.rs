//! Collaboration rooms addressed by URL path.
//!
//! Unlike the presence relay, these rooms are created up front through
//! [`CollabService::create_room`] (or `POST /rooms`) and joined by opening a
//! WebSocket on `/room/{id}`. Every frame a member sends is copied verbatim
//! to the other members, always as a text frame. A room lives until [`CollabService::close_room`]
//! discards it; rooms that merely become empty are kept.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::relay::ServerError;

/// A newly created room and the URL clients connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    /// Room identifier (UUID v4).
    pub room_id: String,
    /// `ws://` URL that joins the room.
    pub url: String,
}

/// First frame a member receives after joining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGreeting {
    pub success: String,
    pub user_id: Uuid,
}

#[derive(Default)]
struct CollabRoom {
    members: HashMap<Uuid, mpsc::UnboundedSender<Message>>,
}

/// Registry of collaboration rooms.
///
/// Thread-safe via [`RwLock`].
pub struct CollabService {
    rooms: RwLock<HashMap<String, CollabRoom>>,
    public_base: String,
}

impl CollabService {
    /// Creates an empty registry whose room URLs point at
    /// `ws://{public_host}:{port}`.
    #[must_use]
    pub fn new(public_host: &str, port: u16) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            public_base: format!("ws://{public_host}:{port}"),
        }
    }

    /// Creates a room and returns its id and connect URL.
    pub async fn create_room(&self) -> CreatedRoom {
        let room_id = Uuid::new_v4().to_string();
        self.rooms
            .write()
            .await
            .insert(room_id.clone(), CollabRoom::default());
        tracing::info!(room_id = %room_id, "collaboration room created");

        CreatedRoom {
            url: format!("{}/room/{room_id}", self.public_base),
            room_id,
        }
    }

    /// Discards a room and drops all of its members.
    ///
    /// Members are sent a Close frame. Returns `true` if the room existed.
    pub async fn close_room(&self, room_id: &str) -> bool {
        let Some(room) = self.rooms.write().await.remove(room_id) else {
            return false;
        };
        for sender in room.members.values() {
            let _ = sender.send(Message::Close(None));
        }
        tracing::info!(room_id = %room_id, members = room.members.len(), "collaboration room closed");
        true
    }

    /// Returns `true` if the room exists.
    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Number of members in a room, or `None` if it does not exist.
    pub async fn member_count(&self, room_id: &str) -> Option<usize> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.members.len())
    }

    /// Adds a member to an existing room under a fresh id.
    async fn join(&self, room_id: &str, sender: mpsc::UnboundedSender<Message>) -> Option<Uuid> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        let member_id = Uuid::new_v4();
        room.members.insert(member_id, sender);
        drop(rooms);
        Some(member_id)
    }

    async fn leave(&self, room_id: &str, member_id: Uuid) {
        if let Some(room) = self.rooms.write().await.get_mut(room_id) {
            room.members.remove(&member_id);
        }
    }

    /// Copies a frame to every member of the room except its sender.
    async fn fan_out(&self, room_id: &str, from: Uuid, msg: &Message) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return;
        };
        for (member_id, sender) in &room.members {
            if *member_id != from && sender.send(msg.clone()).is_err() {
                tracing::debug!(room_id = %room_id, member = %member_id, "send to closed member ignored");
            }
        }
    }
}

/// Serves one member of a collaboration room until it disconnects.
async fn handle_member(socket: WebSocket, service: Arc<CollabService>, room_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let Some(member_id) = service.join(&room_id, tx.clone()).await else {
        tracing::debug!(room_id = %room_id, "room closed before join completed");
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    };
    tracing::info!(room_id = %room_id, member = %member_id, "member joined");

    let greeting = JoinGreeting {
        success: format!("Joined room {room_id}"),
        user_id: member_id,
    };
    match serde_json::to_string(&greeting) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into()));
        }
        Err(e) => tracing::warn!(error = %e, "failed to encode join greeting"),
    }
    drop(tx);

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let reader_service = Arc::clone(&service);
    let reader_room = room_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(_) => {
                    reader_service.fan_out(&reader_room, member_id, &msg).await;
                }
                Message::Binary(data) => {
                    let text = Message::Text(binary_as_text(&data));
                    reader_service.fan_out(&reader_room, member_id, &text).await;
                }
                Message::Close(_) => break,
                _ => {}
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

    service.leave(&room_id, member_id).await;
    tracing::info!(room_id = %room_id, member = %member_id, "member left");
}

/// Decodes a binary frame as UTF-8, replacing invalid sequences.
fn binary_as_text(data: &[u8]) -> Utf8Bytes {
    String::from_utf8_lossy(data).into_owned().into()
}

/// Starts the collaboration room server on `addr`.
///
/// Room URLs advertise `public_host` together with the port actually bound.
///
/// # Errors
///
/// Returns [`ServerError`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
    public_host: &str,
) -> Result<(SocketAddr, Arc<CollabService>, JoinHandle<()>), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
    let service = Arc::new(CollabService::new(public_host, bound_addr.port()));

    let app = axum::Router::new()
        .route("/rooms", axum::routing::post(create_handler))
        .route("/rooms/{id}", axum::routing::delete(close_handler))
        .route("/room/{id}", axum::routing::get(join_handler))
        .with_state(Arc::clone(&service));

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "collaboration server error");
        }
    });

    Ok((bound_addr, service, handle))
}

async fn create_handler(State(service): State<Arc<CollabService>>) -> impl IntoResponse {
    (StatusCode::CREATED, axum::Json(service.create_room().await))
}

async fn close_handler(
    State(service): State<Arc<CollabService>>,
    Path(room_id): Path<String>,
) -> StatusCode {
    if service.close_room(&room_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn join_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<CollabService>>,
    Path(room_id): Path<String>,
) -> Response {
    if !service.room_exists(&room_id).await {
        tracing::debug!(room_id = %room_id, "join for unknown room rejected");
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_member(socket, service, room_id))
        .into_response()
}
