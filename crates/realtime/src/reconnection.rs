//! Connection lifecycle with exponential backoff.
//!
//! Contains the shared [`WsContext`], the connect attempt, disconnect
//! supervision, and reconnect scheduling. Every state transition happens
//! while holding the `conn` lock, and each connect attempt is tagged with a
//! generation number so that results from a superseded attempt are
//! discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use worldbest_session::Session;

use crate::handlers::HandlerRegistry;
use crate::types::{ConnectionEvent, ConnectionState, DisconnectReason, ReconnectConfig};
use crate::ws_client::WsClient;

/// Shared state passed to the lifecycle tasks.
#[derive(Clone)]
pub(crate) struct WsContext {
    pub(crate) url: Arc<str>,
    pub(crate) session: Arc<Session>,
    pub(crate) config: ReconnectConfig,
    pub(crate) handlers: Arc<HandlerRegistry>,
    /// Live client, if any. Also serialises state transitions.
    pub(crate) conn: Arc<Mutex<Option<WsClient>>>,
    /// Bumped by every connect attempt and teardown.
    pub(crate) generation: Arc<AtomicU64>,
    /// Reconnect attempts since the last successful connect.
    pub(crate) attempts: Arc<AtomicU32>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    pub(crate) connected_tx: Arc<watch::Sender<bool>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    /// Pending reconnect timer.
    pub(crate) reconnect_cancel: Arc<Mutex<Option<CancellationToken>>>,
    pub(crate) shutdown: CancellationToken,
}

impl WsContext {
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Option<WsClient>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn emit_event(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("connection event dropped: {e}");
        }
    }

    /// Updates the state and notifies watchers. Caller holds `conn`.
    fn set_state(&self, new_state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|s| {
            if *s == new_state {
                return false;
            }
            *s = new_state;
            true
        });
        if !changed {
            return;
        }
        debug!(state = ?new_state, "connection state changed");
        let connected = new_state == ConnectionState::Connected;
        self.connected_tx.send_if_modified(|c| {
            let modified = *c != connected;
            *c = connected;
            modified
        });
        self.emit_event(ConnectionEvent::StateChanged(new_state));
    }

    /// Returns `true` if a reconnect timer is pending.
    pub(crate) fn reconnect_pending(&self) -> bool {
        self.reconnect_cancel
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }
}

/// Cancels the pending reconnect timer, if any.
pub(crate) fn cancel_reconnect(reconnect_cancel: &Mutex<Option<CancellationToken>>) {
    if let Ok(mut guard) = reconnect_cancel.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Starts a fresh connection with a reset attempt counter.
pub(crate) fn start_fresh(ctx: &WsContext) {
    ctx.attempts.store(0, Ordering::SeqCst);
    tokio::spawn(connect(ctx.clone()));
}

/// Closes the connection and cancels any pending reconnect, leaving the
/// manager idle.
pub(crate) fn teardown(ctx: &WsContext) {
    let client = {
        let mut guard = ctx.lock_conn();
        ctx.generation.fetch_add(1, Ordering::SeqCst);
        cancel_reconnect(&ctx.reconnect_cancel);
        ctx.attempts.store(0, Ordering::SeqCst);
        ctx.set_state(ConnectionState::Idle);
        guard.take()
    };
    if let Some(client) = client {
        debug!("closing realtime connection");
        client.close();
    }
}

/// One connect attempt using the session's current access token.
///
/// Returns a boxed future to break the recursive type cycle with
/// [`reconnect_after`], which this function schedules on failure.
pub(crate) fn connect(ctx: WsContext) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if ctx.shutdown.is_cancelled() || !ctx.session.is_authenticated() {
            debug!("no credentials, not connecting");
            return;
        }

        // The token is read under `conn` so a teardown that ran after this
        // task was spawned cannot be overtaken with a stale credential.
        let (token, generation, previous) = {
            let mut guard = ctx.lock_conn();
            let Some(token) = ctx.session.access_token() else {
                debug!("credentials cleared before connecting");
                return;
            };
            cancel_reconnect(&ctx.reconnect_cancel);
            let generation = ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.set_state(ConnectionState::Connecting);
            (token, generation, guard.take())
        };
        if let Some(previous) = previous {
            previous.close();
        }

        info!(
            url = %ctx.url,
            attempt = ctx.attempts.load(Ordering::SeqCst),
            "connecting to realtime server"
        );

        let result = WsClient::connect(&ctx.url, &token, ctx.handlers.clone()).await;

        let mut guard = ctx.lock_conn();
        if !ctx.is_current(generation) {
            drop(guard);
            if let Ok((client, _)) = result {
                debug!("connect attempt superseded, closing");
                client.close();
            }
            return;
        }

        match result {
            Ok((client, closed_rx)) => {
                *guard = Some(client);
                ctx.attempts.store(0, Ordering::SeqCst);
                ctx.set_state(ConnectionState::Connected);
                drop(guard);
                info!("realtime connected");
                tokio::spawn(supervise(ctx, generation, closed_rx));
            }
            Err(e) if e.is_auth_rejection() => {
                warn!(error = %e, "realtime server rejected credentials");
                ctx.set_state(ConnectionState::Idle);
                ctx.emit_event(ConnectionEvent::AuthRejected);
            }
            Err(e) => {
                warn!(error = %e, "realtime connect failed");
                ctx.set_state(ConnectionState::Disconnected);
                schedule_reconnect(&ctx);
            }
        }
    })
}

/// Waits for a live connection to end and decides what happens next.
async fn supervise(
    ctx: WsContext,
    generation: u64,
    closed_rx: oneshot::Receiver<DisconnectReason>,
) {
    let reason = closed_rx.await.unwrap_or(DisconnectReason::Local);

    let client = {
        let mut guard = ctx.lock_conn();
        if !ctx.is_current(generation) {
            // Closed on purpose from this side.
            return;
        }
        let client = guard.take();
        match &reason {
            DisconnectReason::Dropped(why) => {
                warn!(reason = %why, "realtime connection lost");
                ctx.set_state(ConnectionState::Disconnected);
                schedule_reconnect(&ctx);
            }
            DisconnectReason::ServerClosed { code, reason } => {
                info!(code = ?code, %reason, "realtime server closed the connection");
                ctx.set_state(ConnectionState::Idle);
                ctx.emit_event(ConnectionEvent::ServerClosed {
                    code: *code,
                    reason: reason.clone(),
                });
            }
            DisconnectReason::AuthRejected => {
                ctx.set_state(ConnectionState::Idle);
                ctx.emit_event(ConnectionEvent::AuthRejected);
            }
            DisconnectReason::Local => {
                ctx.set_state(ConnectionState::Idle);
            }
        }
        client
    };
    drop(client);
}

/// Schedules the next reconnect attempt, or gives up once the attempt
/// budget is spent. Caller holds `conn`.
fn schedule_reconnect(ctx: &WsContext) {
    let max = ctx.config.max_attempts;
    let attempt = ctx.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt > max {
        ctx.attempts.store(max, Ordering::SeqCst);
        warn!(attempts = max, "giving up on realtime reconnection");
        ctx.emit_event(ConnectionEvent::ReconnectExhausted { attempts: max });
        return;
    }

    let delay = ctx.config.delay_for_attempt(attempt);
    let delay_secs = delay.as_secs_f64();
    info!(
        attempt,
        delay_secs = format_args!("{delay_secs:.1}"),
        "reconnecting"
    );
    ctx.emit_event(ConnectionEvent::Reconnecting {
        attempt,
        next_retry_secs: delay_secs,
    });

    let cancel = CancellationToken::new();
    cancel_reconnect(&ctx.reconnect_cancel);
    if let Ok(mut guard) = ctx.reconnect_cancel.lock() {
        *guard = Some(cancel.clone());
    }
    tokio::spawn(reconnect_after(ctx.clone(), delay, cancel));
}

/// Waits out the backoff delay, then attempts to connect.
fn reconnect_after(
    ctx: WsContext,
    delay: Duration,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = ctx.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return;
        }
        connect(ctx).await;
    })
}
