//! Relay hub: connection registry, room table, user indexes and dispatch.
//!
//! All state sits behind a single mutex. Every inbound frame is handled
//! under one lock acquisition from parse to the last send, so a presence
//! announcement, its `presence:list` reply and the `presence:join` broadcast
//! are atomic with respect to every other connection. Sends never block:
//! each connection owns an unbounded channel drained by its writer task.
//!
//! Rooms are created by the first presence announcement that names them and
//! are kept for the life of the process, even once empty.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, Utf8Bytes};
use mdrelay_proto::inbound::{ChatRequest, PresenceRequest, SignalKind, SignalRequest};
use mdrelay_proto::outbound::{self, ServerEvent};
use mdrelay_proto::room::resolve_room;
use mdrelay_proto::{ClientMessage, RoomId, Timestamp, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    outbox: Outbox,
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }
}

#[derive(Default)]
struct Room {
    members: HashSet<ConnId>,
    /// Registration order is kept; re-registering a user keeps its slot.
    by_user: Vec<(UserId, ConnId)>,
}

impl Room {
    fn connection_of(&self, user: UserId) -> Option<ConnId> {
        self.by_user
            .iter()
            .find_map(|&(u, conn)| (u == user).then_some(conn))
    }

    /// Points `user` at `conn`, returning the connection it pointed at before.
    fn set_user(&mut self, user: UserId, conn: ConnId) -> Option<ConnId> {
        if let Some(slot) = self.by_user.iter_mut().find(|(u, _)| *u == user) {
            return Some(std::mem::replace(&mut slot.1, conn));
        }
        self.by_user.push((user, conn));
        None
    }

    /// Removes the entry for `user` only if `conn` still owns it.
    fn release_user(&mut self, user: UserId, conn: ConnId) -> bool {
        let before = self.by_user.len();
        self.by_user.retain(|&(u, c)| !(u == user && c == conn));
        self.by_user.len() != before
    }

    fn online(&self) -> Vec<UserId> {
        self.by_user.iter().map(|&(user, _)| user).collect()
    }
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    connections: HashMap<ConnId, Connection>,
    rooms: HashMap<RoomId, Room>,
    /// Process-wide user index, consulted when a room-scoped lookup misses.
    users: HashMap<UserId, ConnId>,
}

impl HubState {
    /// Best-effort delivery of `frame` to every open member of `room_id`.
    fn broadcast(&self, room_id: &RoomId, frame: &Utf8Bytes, exclude: Option<ConnId>) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        for &member in &room.members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(conn) = self.connections.get(&member)
                && conn.is_open()
            {
                send_best_effort(member, &conn.outbox, frame.clone());
            }
        }
    }

    fn send_to(&self, conn_id: ConnId, frame: Utf8Bytes) {
        if let Some(conn) = self.connections.get(&conn_id) {
            send_best_effort(conn_id, &conn.outbox, frame);
        }
    }
}

/// Shared relay state: rooms, memberships and user indexes.
pub struct Hub {
    state: Mutex<HubState>,
    default_room: RoomId,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(RoomId::default_room())
    }
}

impl Hub {
    /// Creates an empty hub that files unscoped traffic under `default_room`.
    #[must_use]
    pub fn new(default_room: RoomId) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            default_room,
        }
    }

    /// The room used when neither the frame nor the connection names one.
    #[must_use]
    pub const fn default_room(&self) -> &RoomId {
        &self.default_room
    }

    /// Registers a freshly accepted connection and greets it with `ready`.
    pub fn connect(&self, outbox: Outbox) -> ConnId {
        let ready = encode_event(&ServerEvent::Ready {
            server_time: Timestamp::now(),
        });

        let mut state = self.state.lock();
        state.next_id += 1;
        let conn_id = ConnId(state.next_id);
        if let Some(frame) = ready {
            send_best_effort(conn_id, &outbox, frame);
        }
        state.connections.insert(
            conn_id,
            Connection {
                outbox,
                user_id: None,
                room_id: None,
            },
        );
        drop(state);

        conn_id
    }

    /// Parses and dispatches one inbound text frame.
    ///
    /// Frames that do not parse into a known message are dropped without
    /// any reply to the sender.
    pub fn handle_frame(&self, conn_id: ConnId, frame: &str) {
        let msg = match ClientMessage::parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "dropping inbound frame");
                return;
            }
        };
        tracing::trace!(conn_id = %conn_id, kind = msg.kind(), "inbound message");
        self.dispatch(conn_id, msg);
    }

    /// Applies one parsed message on behalf of `conn_id`.
    pub fn dispatch(&self, conn_id: ConnId, msg: ClientMessage) {
        let mut state = self.state.lock();
        match msg {
            ClientMessage::Chat(chat) => self.on_chat(&state, conn_id, chat),
            ClientMessage::Presence(presence) => self.on_presence(&mut state, conn_id, presence),
            ClientMessage::Offer(signal) => {
                self.on_signal(&state, conn_id, SignalKind::Offer, signal);
            }
            ClientMessage::Answer(signal) => {
                self.on_signal(&state, conn_id, SignalKind::Answer, signal);
            }
            ClientMessage::Candidate(signal) => {
                self.on_signal(&state, conn_id, SignalKind::Candidate, signal);
            }
        }
    }

    /// Forgets a closed connection and announces its departure.
    ///
    /// Every connection that announced presence produces one
    /// `presence:leave` for the rest of its room. Index entries are released
    /// only if they still point at this connection, so a user who already
    /// re-announced from a newer socket keeps that mapping.
    pub fn disconnect(&self, conn_id: ConnId) {
        let mut state = self.state.lock();
        let Some(conn) = state.connections.remove(&conn_id) else {
            return;
        };
        let (Some(user_id), Some(room_id)) = (conn.user_id, conn.room_id) else {
            tracing::debug!(conn_id = %conn_id, "anonymous connection closed");
            return;
        };

        if state.users.get(&user_id) == Some(&conn_id) {
            state.users.remove(&user_id);
        }
        let owned = state.rooms.get_mut(&room_id).is_some_and(|room| {
            room.members.remove(&conn_id);
            room.release_user(user_id, conn_id)
        });

        tracing::info!(
            conn_id = %conn_id,
            user_id = %user_id,
            room_id = %room_id,
            superseded = !owned,
            "member left"
        );

        if let Some(frame) = encode_event(&ServerEvent::PresenceLeave {
            user_id,
            room_id: room_id.clone(),
        }) {
            state.broadcast(&room_id, &frame, Some(conn_id));
        }
    }

    /// Sends a Close frame to every live connection.
    pub fn close_all_connections(&self) {
        let state = self.state.lock();
        for (conn_id, conn) in &state.connections {
            tracing::info!(conn_id = %conn_id, "sending close frame");
            let _ = conn.outbox.send(Message::Close(None));
        }
    }

    /// Users currently online in `room_id`, in registration order.
    #[must_use]
    pub fn online_users(&self, room_id: &RoomId) -> Vec<UserId> {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(Room::online)
            .unwrap_or_default()
    }

    /// Number of connections joined to `room_id`.
    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map_or(0, |room| room.members.len())
    }

    /// Number of rooms ever created.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Number of accepted, not yet closed connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    fn on_chat(&self, state: &HubState, conn_id: ConnId, chat: ChatRequest) {
        let bound = state
            .connections
            .get(&conn_id)
            .and_then(|c| c.room_id.as_ref());
        let room_id = resolve_room(chat.room_id.as_ref(), bound, &self.default_room);

        let payload = chat.into_payload(room_id.clone(), Timestamp::now());
        let Some(frame) = encode_event(&ServerEvent::Chat(payload)) else {
            return;
        };

        state.send_to(conn_id, frame.clone());
        state.broadcast(&room_id, &frame, Some(conn_id));
    }

    fn on_presence(&self, state: &mut HubState, conn_id: ConnId, presence: PresenceRequest) {
        let user_id = presence.user_id;
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return;
        };

        // The first announcement fixes the room for the connection's lifetime.
        let room_id = match &conn.room_id {
            Some(bound) => {
                if presence.room_id.as_ref().is_some_and(|r| r != bound) {
                    tracing::debug!(
                        conn_id = %conn_id,
                        room_id = %bound,
                        "ignoring room change on repeated presence"
                    );
                }
                bound.clone()
            }
            None => resolve_room(presence.room_id.as_ref(), None, &self.default_room),
        };
        let previous_user = conn.user_id.replace(user_id);
        conn.room_id = Some(room_id.clone());

        let room = state.rooms.entry(room_id.clone()).or_default();
        if let Some(previous) = previous_user.filter(|&p| p != user_id) {
            room.release_user(previous, conn_id);
            if state.users.get(&previous) == Some(&conn_id) {
                state.users.remove(&previous);
            }
        }
        room.members.insert(conn_id);
        if let Some(old) = room.set_user(user_id, conn_id)
            && old != conn_id
        {
            tracing::info!(
                conn_id = %conn_id,
                superseded = %old,
                user_id = %user_id,
                "user re-announced from a new connection"
            );
        }
        let online = room.online();
        state.users.insert(user_id, conn_id);

        tracing::info!(
            conn_id = %conn_id,
            user_id = %user_id,
            room_id = %room_id,
            online = online.len(),
            "presence registered"
        );

        if let Some(frame) = encode_event(&ServerEvent::PresenceList {
            users: online,
            room_id: room_id.clone(),
        }) {
            state.send_to(conn_id, frame);
        }
        if let Some(frame) = encode_event(&ServerEvent::PresenceJoin {
            user_id,
            room_id: room_id.clone(),
        }) {
            state.broadcast(&room_id, &frame, Some(conn_id));
        }
    }

    fn on_signal(&self, state: &HubState, conn_id: ConnId, kind: SignalKind, signal: SignalRequest) {
        let bound = state
            .connections
            .get(&conn_id)
            .and_then(|c| c.room_id.as_ref());
        let room_id = resolve_room(signal.room_id.as_ref(), bound, &self.default_room);
        let to = signal.to;
        if to.get() == 0 {
            tracing::debug!(conn_id = %conn_id, kind = %kind, "signal without target dropped");
            return;
        }

        let target = state
            .rooms
            .get(&room_id)
            .and_then(|room| room.connection_of(to))
            .or_else(|| state.users.get(&to).copied());
        let Some((target_id, target)) =
            target.and_then(|id| state.connections.get(&id).map(|c| (id, c)))
        else {
            tracing::debug!(conn_id = %conn_id, to = %to, kind = %kind, "signal target not found");
            return;
        };
        if !target.is_open() {
            tracing::debug!(conn_id = %conn_id, to = %to, kind = %kind, "signal target closed");
            return;
        }

        let forward = signal.into_forward(kind, &room_id);
        match serde_json::to_string(&forward) {
            Ok(json) => {
                tracing::debug!(
                    from = %conn_id,
                    to = %to,
                    room_id = %room_id,
                    kind = %kind,
                    "forwarding signal"
                );
                send_best_effort(target_id, &target.outbox, json.into());
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode signal for forwarding"),
        }
    }
}

/// Encodes a server event, logging instead of failing.
fn encode_event(event: &ServerEvent) -> Option<Utf8Bytes> {
    match outbound::encode(event) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode server event");
            None
        }
    }
}

/// Queues a text frame for a connection. A closed queue is logged and ignored.
fn send_best_effort(conn_id: ConnId, outbox: &Outbox, frame: Utf8Bytes) {
    if outbox.send(Message::Text(frame)).is_err() {
        tracing::debug!(conn_id = %conn_id, "send to closed connection ignored");
    }
}
