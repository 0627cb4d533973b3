//! Client-side session state.
//!
//! Holds the access/refresh token pair behind an injectable
//! [`CredentialStore`] and notifies observers when it changes.

pub mod credentials;
pub mod file_store;
pub mod session;

pub use credentials::{CredentialStore, Credentials, MemoryStore, StoreError};
pub use file_store::FileStore;
pub use session::{Session, SessionEvent};
