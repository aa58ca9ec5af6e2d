//! Room identifiers and the room resolution rule.
//!
//! A frame may name its room explicitly. When it does not, the room the
//! connection bound to at its first `presence` announcement is used, and
//! failing that the configured default room.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identifier of the room every unscoped connection falls into.
pub const DEFAULT_ROOM: &str = "default";

/// Name of a room. Never empty when produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wraps a room name. Returns `None` for the empty string, which the
    /// protocol treats the same as an absent room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() { None } else { Some(Self(name)) }
    }

    /// The well-known default room.
    #[must_use]
    pub fn default_room() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }

    /// Borrows the room name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::default_room()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Picks the room a frame applies to.
///
/// Priority: an explicit room on the frame, then the room the connection is
/// bound to, then `default`.
#[must_use]
pub fn resolve_room(
    explicit: Option<&RoomId>,
    bound: Option<&RoomId>,
    default: &RoomId,
) -> RoomId {
    explicit.or(bound).unwrap_or(default).clone()
}

/// Deserializes an optional `roomId` field leniently.
///
/// Only a non-empty JSON string names a room. Any other value (number,
/// null, empty string, object) is read as "no room given" instead of
/// failing the whole frame.
pub(crate) fn lenient_room_id<'de, D>(deserializer: D) -> Result<Option<RoomId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(name)) => RoomId::new(name),
        _ => None,
    })
}
