//! Credential persistence on local disk.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::credentials::{CredentialStore, Credentials, StoreError};

/// File name of the persisted credentials inside the config directory.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Credential store backed by a JSON file.
///
/// Credentials are cached in memory and written through on every change.
/// The file is removed when the credentials are cleared.
pub struct FileStore {
    path: PathBuf,
    credentials: RwLock<Option<Credentials>>,
}

impl FileStore {
    /// Opens a store at `path`, loading existing credentials from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let credentials = load_credentials(&path)?;
        Ok(Self {
            path,
            credentials: RwLock::new(credentials),
        })
    }

    /// Opens the store at the default per-user location.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = default_credentials_path().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory for this platform",
            ))
        })?;
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(credentials)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = ?self.path, "persisted credentials");
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, credentials: Credentials) -> Result<(), StoreError> {
        self.persist(&credentials)?;
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        // Drop the in-memory copy first so a failed delete still logs out
        // this process.
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = ?self.path, "removed credentials file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Loads credentials from a JSON file on disk.
fn load_credentials(path: &Path) -> Result<Option<Credentials>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let credentials: Credentials = serde_json::from_str(&data)?;
    debug!(path = ?path, "loaded credentials");
    Ok(Some(credentials))
}

/// Returns the default credentials path.
pub fn default_credentials_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("worldbest").join(CREDENTIALS_FILE))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
