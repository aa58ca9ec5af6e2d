//! Shared protocol definitions for the `mdrelay` JSON wire format.
//!
//! Every WebSocket frame carries one JSON object discriminated by its
//! `type` field. Inbound frames parse into [`inbound::ClientMessage`];
//! everything the relay emits on its own is an [`outbound::ServerEvent`].

pub mod ids;
pub mod inbound;
pub mod outbound;
pub mod room;

pub use ids::{Timestamp, UserId};
pub use inbound::{ClientMessage, ProtoError};
pub use outbound::ServerEvent;
pub use room::RoomId;
