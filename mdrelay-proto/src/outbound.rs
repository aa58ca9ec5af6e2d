//! Relay-to-client events.
//!
//! Signaling payloads are not listed here: the relay forwards those as the
//! client's own JSON object (see [`crate::inbound::SignalRequest`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{Timestamp, UserId};
use crate::inbound::ProtoError;
use crate::room::RoomId;

/// Events originated by the relay, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Sent once, right after a connection is accepted.
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready { server_time: Timestamp },

    /// A chat line, echoed to its sender and broadcast to the room.
    #[serde(rename = "message")]
    Chat(ChatPayload),

    /// Reply to a presence announcement: everyone online in the room.
    #[serde(rename = "presence:list", rename_all = "camelCase")]
    PresenceList { users: Vec<UserId>, room_id: RoomId },

    /// Another member announced itself in the room.
    #[serde(rename = "presence:join", rename_all = "camelCase")]
    PresenceJoin { user_id: UserId, room_id: RoomId },

    /// A previously announced member disconnected.
    #[serde(rename = "presence:leave", rename_all = "camelCase")]
    PresenceLeave { user_id: UserId, room_id: RoomId },
}

/// Normalized chat line as delivered to the room.
///
/// Sender fields the client left out are omitted; fields the client sent as
/// `null` are sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Value>,
    pub text: String,
    pub timestamp: Value,
    pub room_id: RoomId,
}

/// Serializes a server event into a text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Encode`] if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtoError> {
    serde_json::to_string(event).map_err(ProtoError::Encode)
}

/// Parses a text frame produced by [`encode`]. Used by clients and tests.
///
/// # Errors
///
/// Returns [`ProtoError::Unrecognized`] if the frame is not a server event.
pub fn decode(frame: &str) -> Result<ServerEvent, ProtoError> {
    serde_json::from_str(frame).map_err(ProtoError::Unrecognized)
}
