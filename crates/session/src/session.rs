//! Session handle shared by the HTTP client and the realtime manager.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::credentials::{CredentialStore, Credentials, StoreError};

/// Lifecycle notifications for the signed-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials were stored after login or signup.
    LoggedIn,
    /// The access token was replaced by a refresh exchange.
    Refreshed,
    /// The user signed out.
    LoggedOut,
    /// The refresh token was rejected. The application should return to
    /// its signed-out state.
    Expired,
}

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 16;

/// The single source of truth for the current credentials.
///
/// Every mutation goes through here so observers see it: the credential
/// watch channel drives the realtime connection lifecycle, and the event
/// channel lets the application react to expiry.
pub struct Session {
    store: Arc<dyn CredentialStore>,
    current: watch::Sender<Option<Credentials>>,
    /// Bumped by every login. A refresh keeps the epoch.
    logins: watch::Sender<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (current, _) = watch::channel(store.get());
        let (logins, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            current,
            logins,
            events,
        }
    }

    /// Returns the stored credentials, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        self.store.get()
    }

    /// Returns the current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.store.get().map(|c| c.access_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    /// Stores credentials obtained from login or signup.
    pub fn login(&self, credentials: Credentials) -> Result<(), StoreError> {
        self.store.set(credentials.clone())?;
        // The epoch moves before the credential watch so a watcher woken by
        // either one already sees the new login.
        self.logins.send_modify(|epoch| *epoch += 1);
        self.current.send_replace(Some(credentials));
        let _ = self.events.send(SessionEvent::LoggedIn);
        info!("session started");
        Ok(())
    }

    /// Stores credentials obtained from a refresh exchange.
    pub fn refreshed(&self, credentials: Credentials) -> Result<(), StoreError> {
        self.store.set(credentials.clone())?;
        self.current.send_replace(Some(credentials));
        let _ = self.events.send(SessionEvent::Refreshed);
        info!("access token refreshed");
        Ok(())
    }

    /// Clears credentials after a deliberate sign-out.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.clear_with(SessionEvent::LoggedOut)
    }

    /// Clears credentials after an unrecoverable refresh failure.
    pub fn expire(&self) -> Result<(), StoreError> {
        warn!("session expired, credentials cleared");
        self.clear_with(SessionEvent::Expired)
    }

    fn clear_with(&self, event: SessionEvent) -> Result<(), StoreError> {
        // Observers are notified even if the backing store fails to delete,
        // so nothing keeps using the old token in this process.
        let result = self.store.clear();
        self.current.send_replace(None);
        let _ = self.events.send(event);
        if let Err(e) = &result {
            warn!(error = %e, "failed to clear credential store");
        }
        result
    }

    /// Watches the current credentials.
    pub fn watch(&self) -> watch::Receiver<Option<Credentials>> {
        self.current.subscribe()
    }

    /// Watches the login epoch, which changes whenever a login replaces
    /// the signed-in identity. Token refreshes leave it untouched.
    pub fn watch_logins(&self) -> watch::Receiver<u64> {
        self.logins.subscribe()
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
