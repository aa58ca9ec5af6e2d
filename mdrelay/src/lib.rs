//! `mdrelay` library.
//!
//! Exposes the presence relay and the collaboration room server for use in
//! tests and embedding. The relay accepts WebSocket connections, groups them
//! into rooms by presence announcements, and broadcasts chat, presence and
//! WebRTC signaling between them.

pub mod collab;
pub mod config;
pub mod hub;
pub mod relay;
