//! Durable credential storage
//!
//! Holds the access token, the refresh token and the last known user
//! snapshot under three fixed keys. Reads and writes are synchronous: the
//! session consults the store on startup and writes through on every
//! mutation, never across an await point.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Key holding the access token
pub const AUTH_TOKEN_KEY: &str = "authToken";
/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Key holding the JSON user snapshot
pub const USER_KEY: &str = "user";

/// Errors that can occur during credential storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Keyring operation failed
    #[cfg(feature = "keyring")]
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Reading or writing the credentials file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be parsed
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

/// A synchronous key/value store that survives process restarts
pub trait CredentialStore: Send + Sync {
    /// Returns `Some(value)` if the key is stored
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores a value, overwriting any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes a value. `Ok(true)` if it existed, `Ok(false)` if not.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Backend name, used in logs
    fn name(&self) -> &str;

    /// Removes every key the session writes
    fn clear_all(&self) -> Result<(), StoreError> {
        for key in known_keys() {
            self.delete(key)?;
        }
        Ok(())
    }
}

/// Every key the session reads or writes
pub fn known_keys() -> &'static [&'static str] {
    &[AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY]
}

// ============================================================================
// Keyring
// ============================================================================

/// OS credential manager backend (Windows Credential Manager, macOS
/// Keychain, Linux Secret Service)
///
/// Only built with the `keyring` feature, which also pulls in the native
/// platform backends.
#[cfg(feature = "keyring")]
pub struct KeyringStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringStore {
    /// Creates a store under the default service name
    pub fn new() -> Self {
        Self::with_service("Bookworm")
    }

    /// Creates a store under a custom service name
    ///
    /// Useful for keeping test credentials apart from real ones.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring")]
impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Keyring(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let entry = keyring::Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(StoreError::Keyring(e)),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// File permissions for the credentials file (Unix only): owner read/write
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Single JSON object file backend
///
/// The whole map is rewritten through a temporary file and renamed into
/// place on every mutation.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/credentials.json`
    pub fn default_path() -> Option<PathBuf> {
        crate::config::ClientConfig::config_dir().map(|dir| dir.join("credentials.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StoreError::InvalidFormat(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError::InvalidFormat(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE))?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.write_map(&map)?;
        Ok(true)
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local backend for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.remove(key).is_some())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
