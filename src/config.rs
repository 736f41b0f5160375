//! Configuration management for Bookworm
//!
//! Persistent client settings: backend location, timeouts and where the
//! credential lives. Supports Windows, macOS, and Linux config directories.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;

#[cfg(feature = "keyring")]
use crate::auth::KeyringStore;
use crate::auth::{CredentialStore, FileStore, MemoryStore};

/// Errors that can occur while loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config path")]
    NoConfigDir,

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Keyring storage requested but this build has no keyring support (enable the `keyring` feature)")]
    KeyringUnavailable,
}

/// Where the credential is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file next to the config
    #[default]
    File,
    /// OS credential manager (requires the `keyring` feature)
    Keyring,
    /// Nothing survives the process
    Memory,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub api_base_url: String,
    /// Timeout for ordinary requests, in seconds
    pub request_timeout_secs: u64,
    /// Upper bound for one token refresh exchange, in seconds
    pub refresh_timeout_secs: u64,
    /// Credential storage backend
    pub storage: StorageBackend,
    /// Keep the last profile snapshot across restarts
    pub persist_profile: bool,
    /// Route the guard sends unauthenticated users to
    pub login_path: String,
    /// Landing route for signed-in users
    pub home_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 15,
            storage: StorageBackend::File,
            persist_profile: true,
            login_path: "/auth/login".to_string(),
            home_path: "/".to_string(),
        }
    }
}

impl ClientConfig {
    /// Gets the config directory path (cross-platform)
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|p| PathBuf::from(p).join("Bookworm"))
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|p| PathBuf::from(p).join("Library/Application Support/Bookworm"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
                .map(|p| p.join("bookworm"))
        }
    }

    /// Gets the default config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.json"))
    }

    /// Loads configuration from the default path, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::debug!("Using default config ({}): {}", path.display(), e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Loads configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Saves configuration to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// API base URL, normalised to end with `/` so relative paths join under it
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw)
    }

    /// Opens the configured credential store
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>, ConfigError> {
        let store: Arc<dyn CredentialStore> = match self.storage {
            StorageBackend::File => {
                let path = FileStore::default_path().ok_or(ConfigError::NoConfigDir)?;
                Arc::new(FileStore::new(path))
            }
            #[cfg(feature = "keyring")]
            StorageBackend::Keyring => Arc::new(KeyringStore::new()),
            #[cfg(not(feature = "keyring"))]
            StorageBackend::Keyring => return Err(ConfigError::KeyringUnavailable),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, "http://localhost:8000/api");
        assert_eq!(config.refresh_timeout_secs, 15);
        assert_eq!(config.storage, StorageBackend::File);
        assert!(config.persist_profile);
        assert_eq!(config.login_path, "/auth/login");
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url().unwrap().as_str(), "http://localhost:8000/api/");

        let config = ClientConfig {
            api_base_url: "https://books.example.com/api/".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url().unwrap().as_str(), "https://books.example.com/api/");

        let broken = ClientConfig {
            api_base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(broken.base_url().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");

        let config = ClientConfig {
            refresh_timeout_secs: 3,
            storage: StorageBackend::Keyring,
            persist_profile: false,
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = ClientConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"storage": "memory"}"#).unwrap();

        let loaded = ClientConfig::load_from(&path).unwrap();
        assert_eq!(loaded.storage, StorageBackend::Memory);
        assert_eq!(loaded.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientConfig::load_from(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_memory_store_backend() {
        let config = ClientConfig {
            storage: StorageBackend::Memory,
            ..Default::default()
        };
        let store = config.open_store().unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[cfg(not(feature = "keyring"))]
    #[test]
    fn test_keyring_backend_rejected_without_feature() {
        let config = ClientConfig {
            storage: StorageBackend::Keyring,
            ..Default::default()
        };
        assert!(matches!(
            config.open_store(),
            Err(ConfigError::KeyringUnavailable)
        ));
    }

    #[cfg(feature = "keyring")]
    #[test]
    fn test_keyring_backend_opens_with_feature() {
        let config = ClientConfig {
            storage: StorageBackend::Keyring,
            ..Default::default()
        };
        assert_eq!(config.open_store().unwrap().name(), "keyring");
    }
}
