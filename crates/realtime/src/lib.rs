//! Realtime connection manager for WorldBest.
//!
//! Keeps one authenticated WebSocket open while the session holds a
//! credential, reconnecting with exponential backoff, and routes inbound
//! events to registered handlers.

pub mod handlers;
pub mod manager;
mod pumps;
pub(crate) mod reconnection;
pub mod types;
pub mod ws_client;

#[cfg(test)]
mod test_server;

pub use handlers::{EventHandler, HandlerId};
pub use manager::ConnectionManager;
pub use types::{ConnectionEvent, ConnectionState, DisconnectReason, ReconnectConfig};
pub use ws_client::{WsClient, WsError};
