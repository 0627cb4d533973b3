//! Connection manager driven by session credentials.
//!
//! Connects when a credential becomes available, disconnects when it is
//! cleared, and reconnects automatically with exponential backoff on
//! unexpected disconnects.

use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use worldbest_protocol::envelope::{MessageType, WebSocketMessage};
use worldbest_session::Session;

use crate::handlers::{HandlerId, HandlerRegistry};
use crate::reconnection::{WsContext, start_fresh, teardown};
use crate::types::{ConnectionEvent, ConnectionState, ReconnectConfig};

/// Realtime connection manager.
///
/// One instance per session. Handlers registered with [`on`](Self::on)
/// stay registered across reconnects.
pub struct ConnectionManager {
    ctx: WsContext,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a manager for `url`. Nothing happens until [`start`](Self::start).
    pub fn new(url: impl Into<String>, session: Arc<Session>, config: ReconnectConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let url: String = url.into();

        Self {
            ctx: WsContext {
                url: Arc::from(url),
                session,
                config,
                handlers: Arc::new(HandlerRegistry::new()),
                conn: Arc::new(Mutex::new(None)),
                generation: Arc::new(AtomicU64::new(0)),
                attempts: Arc::new(AtomicU32::new(0)),
                state_tx: Arc::new(watch::channel(ConnectionState::Idle).0),
                connected_tx: Arc::new(watch::channel(false).0),
                events_tx,
                reconnect_cancel: Arc::new(Mutex::new(None)),
                shutdown: CancellationToken::new(),
            },
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
            watcher: Mutex::new(None),
        }
    }

    /// Starts following the session's credentials. Must be called from
    /// within a Tokio runtime. Calling it again has no effect.
    pub fn start(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.is_some() || self.ctx.shutdown.is_cancelled() {
            return;
        }
        *watcher = Some(tokio::spawn(follow_credentials(self.ctx.clone())));
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Sends an event to the server. Dropped silently unless connected.
    pub fn emit(&self, event: impl Into<MessageType>, payload: serde_json::Value) {
        let msg = WebSocketMessage::new(event, payload);
        if self.ctx.state() != ConnectionState::Connected {
            trace!(msg_type = %msg.msg_type, "not connected, dropping outbound event");
            return;
        }
        let guard = self.ctx.lock_conn();
        if let Some(client) = guard.as_ref()
            && let Err(e) = client.send(&msg)
        {
            debug!(msg_type = %msg.msg_type, error = %e, "outbound event dropped");
        }
    }

    /// Registers a handler for inbound messages of type `event`.
    pub fn on<F>(&self, event: impl Into<MessageType>, handler: F) -> HandlerId
    where
        F: Fn(&WebSocketMessage) + Send + Sync + 'static,
    {
        self.ctx.handlers.add(event.into(), Arc::new(handler))
    }

    /// Removes the handler `id` for `event`, or all of `event`'s handlers
    /// when `id` is `None`. Returns `true` if anything was removed.
    pub fn off(&self, event: impl Into<MessageType>, id: Option<HandlerId>) -> bool {
        self.ctx.handlers.remove(&event.into(), id)
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.ctx.connected_tx.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.ctx.connected_tx.subscribe()
    }

    /// Drops any current connection and connects again with a reset
    /// attempt counter. No-op without credentials.
    pub fn reconnect(&self) {
        if self.ctx.shutdown.is_cancelled() || !self.ctx.session.is_authenticated() {
            return;
        }
        info!("manual reconnect requested");
        start_fresh(&self.ctx);
    }

    /// Closes the connection and stops following credentials. Idempotent.
    pub fn shutdown(&self) {
        if self.ctx.shutdown.is_cancelled() {
            return;
        }
        self.ctx.shutdown.cancel();
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        teardown(&self.ctx);
        info!("connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drives the lifecycle from credential transitions.
///
/// A refreshed token does not reconnect a healthy socket, since reconnects
/// read the current token anyway. A new login always does: the socket is
/// bound to one identity, and the credential watch alone cannot tell a
/// logout followed by a login apart from a refresh.
async fn follow_credentials(ctx: WsContext) {
    let mut creds = ctx.session.watch();
    let mut logins = ctx.session.watch_logins();
    let mut had = creds.borrow_and_update().is_some();
    let mut epoch = *logins.borrow_and_update();
    if had {
        start_fresh(&ctx);
    }

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            changed = creds.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = logins.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let has = creds.borrow_and_update().is_some();
        let latest = *logins.borrow_and_update();
        let new_login = latest != epoch;
        epoch = latest;

        match (had, has) {
            (false, true) => {
                info!("credentials available, connecting");
                start_fresh(&ctx);
            }
            (true, false) => {
                info!("credentials cleared, disconnecting");
                teardown(&ctx);
            }
            (true, true) if new_login => {
                info!("signed in as a new identity, reconnecting");
                teardown(&ctx);
                start_fresh(&ctx);
            }
            (true, true) if needs_connection(&ctx) => {
                debug!("credentials replaced while not connected, connecting");
                start_fresh(&ctx);
            }
            _ => {}
        }
        had = has;
    }
}

/// Idle, or disconnected with no reconnect pending (attempts exhausted).
fn needs_connection(ctx: &WsContext) -> bool {
    match ctx.state() {
        ConnectionState::Idle => true,
        ConnectionState::Disconnected => !ctx.reconnect_pending(),
        ConnectionState::Connecting | ConnectionState::Connected => false,
    }
}
