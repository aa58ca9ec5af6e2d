//! Client-to-relay messages.
//!
//! Frames are parsed once into the closed [`ClientMessage`] union. Anything
//! that does not fit a known variant (bad JSON, unknown `type`, a required
//! field missing or of the wrong JSON type) is an error the relay drops.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::ids::{Timestamp, UserId};
use crate::outbound::ChatPayload;
use crate::room::{RoomId, lenient_room_id};

/// Error type for protocol parse and encode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object does not match any known message shape.
    #[error("unrecognized message: {0}")]
    Unrecognized(#[source] serde_json::Error),
    /// An outbound event could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Messages a client may send to the relay, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Chat text to echo and broadcast to the room.
    #[serde(rename = "message")]
    Chat(ChatRequest),
    /// Presence announcement binding the connection to a user and room.
    #[serde(rename = "presence")]
    Presence(PresenceRequest),
    /// WebRTC session offer for a single peer.
    #[serde(rename = "rtc:offer")]
    Offer(SignalRequest),
    /// WebRTC session answer for a single peer.
    #[serde(rename = "rtc:answer")]
    Answer(SignalRequest),
    /// WebRTC ICE candidate for a single peer.
    #[serde(rename = "rtc:candidate")]
    Candidate(SignalRequest),
}

impl ClientMessage {
    /// Parses one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidJson`] for unparseable input,
    /// [`ProtoError::NotAnObject`] for non-object JSON, and
    /// [`ProtoError::Unrecognized`] for objects of unknown or ill-formed type.
    pub fn parse(frame: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(frame).map_err(ProtoError::InvalidJson)?;
        Self::from_value(value)
    }

    /// Converts an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`ClientMessage::parse`], minus the JSON syntax case.
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        if !value.is_object() {
            return Err(ProtoError::NotAnObject);
        }
        serde_json::from_value(value).map_err(ProtoError::Unrecognized)
    }

    /// Short name of the message type, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "message",
            Self::Presence(_) => "presence",
            Self::Offer(_) => SignalKind::Offer.as_str(),
            Self::Answer(_) => SignalKind::Answer.as_str(),
            Self::Candidate(_) => SignalKind::Candidate.as_str(),
        }
    }
}

/// A chat line as sent by a client.
///
/// Sender metadata (`id`, `userId`, `name`, `avatar`) is client-supplied and
/// passed through untouched; the relay does not validate it. A field sent as
/// `null` is `Some(Value::Null)`, distinct from an absent field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub text: String,
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub user_id: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub avatar: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, deserialize_with = "lenient_room_id")]
    pub room_id: Option<RoomId>,
}

impl ChatRequest {
    /// Builds the normalized payload delivered to the room.
    ///
    /// A missing or falsy `timestamp` (`0`, `""`, `false`, `null`) is
    /// replaced by `now`.
    #[must_use]
    pub fn into_payload(self, room_id: RoomId, now: Timestamp) -> ChatPayload {
        let timestamp = match self.timestamp {
            Some(ts) if is_truthy(&ts) => ts,
            _ => Value::from(now.as_millis()),
        };
        ChatPayload {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            avatar: self.avatar,
            text: self.text,
            timestamp,
            room_id,
        }
    }
}

/// Presence announcement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub user_id: UserId,
    #[serde(default, deserialize_with = "lenient_room_id")]
    pub room_id: Option<RoomId>,
}

/// Which of the three signaling messages a [`SignalRequest`] arrived as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    /// Wire name of the signaling type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "rtc:offer",
            Self::Answer => "rtc:answer",
            Self::Candidate => "rtc:candidate",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-to-point signaling payload.
///
/// The relay reads only `to` and `roomId`; every other field (`sdp`,
/// `candidate`, `from`, ...) is kept in `fields` and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub to: UserId,
    #[serde(default, deserialize_with = "lenient_room_id")]
    pub room_id: Option<RoomId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SignalRequest {
    /// Rebuilds the original object for the target peer, with `roomId` set
    /// to the resolved room.
    #[must_use]
    pub fn into_forward(self, kind: SignalKind, room_id: &RoomId) -> Value {
        let mut object = self.fields;
        object.insert("type".to_string(), Value::from(kind.as_str()));
        object.insert("to".to_string(), Value::from(self.to.get()));
        object.insert("roomId".to_string(), Value::from(room_id.as_str()));
        Value::Object(object)
    }
}

/// Any present value, `null` included, is `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JavaScript-style truthiness of a JSON value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
