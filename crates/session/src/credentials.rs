use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Errors from credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Access/refresh token pair for the signed-in account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Storage backend for the current credentials.
///
/// Implementations must be cheap to read: `get` is called before every
/// outbound request.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credentials, if any.
    fn get(&self) -> Option<Credentials>;

    /// Replaces the stored credentials.
    fn set(&self, credentials: Credentials) -> Result<(), StoreError>;

    /// Removes the stored credentials.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Non-persistent store. Credentials live as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<Option<Credentials>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, credentials: Credentials) -> Result<(), StoreError> {
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_starts_empty() {
        let store = MemoryStore::new();
        assert!(store.get().is_none());
    }

    #[test]
    fn memory_store_set_and_clear() {
        let store = MemoryStore::new();
        store.set(Credentials::new("A1", "R1")).unwrap();
        assert_eq!(store.get().unwrap().access_token, "A1");

        store.set(Credentials::new("A2", "R2")).unwrap();
        assert_eq!(store.get().unwrap(), Credentials::new("A2", "R2"));

        store.clear().unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn debug_redacts_tokens() {
        let creds = Credentials::new("secret-access", "secret-refresh");
        let out = format!("{creds:?}");
        assert!(!out.contains("secret"));
        assert!(out.contains("redacted"));
    }

    #[test]
    fn credentials_serialize_camel_case() {
        let json = serde_json::to_value(Credentials::new("A1", "R1")).unwrap();
        assert_eq!(json, serde_json::json!({"accessToken": "A1", "refreshToken": "R1"}));
    }
}
