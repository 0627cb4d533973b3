//! Wire types for the WorldBest backend.
//!
//! Covers the REST envelope and error body, authentication payloads,
//! and the realtime `WebSocketMessage` envelope with its event payloads.

pub mod api;
pub mod auth;
pub mod collaboration;
pub mod constants;
pub mod envelope;
