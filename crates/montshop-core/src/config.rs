//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, where the access token is persisted, request/device timeouts and
//! the last login used.
//!
//! Configuration is stored at `~/.config/montshop/config.json`. The
//! `MONTSHOP_API_URL` and `MONTSHOP_TOKEN_STORAGE` environment variables
//! override the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileTokenStorage, KeyringTokenStorage, TokenStore};
use crate::device::{load_or_create_device_id, DeviceIdResolver, MachineIdProvider};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "montshop";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// 30s allows for slow backend responses while failing fast enough at the till.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_DEVICE_ID_TIMEOUT_MS: u64 = 2000;

pub const API_URL_ENV: &str = "MONTSHOP_API_URL";
pub const TOKEN_STORAGE_ENV: &str = "MONTSHOP_TOKEN_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorageKind {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for TokenStorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            other => Err(anyhow::anyhow!("Unknown token storage: {}", other)),
        }
    }
}

/// Where the `X-Device-Id` header value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceIdSource {
    /// Random id generated once and kept in the config directory
    #[default]
    Generated,
    /// Host machine id, queried through the platform bridge
    MachineId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub last_login: Option<String>,
    pub token_storage: TokenStorageKind,
    pub device_id_source: DeviceIdSource,
    pub request_timeout_secs: u64,
    pub device_id_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            last_login: None,
            token_storage: TokenStorageKind::default(),
            device_id_source: DeviceIdSource::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            device_id_timeout_ms: DEFAULT_DEVICE_ID_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent) and apply env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(TOKEN_STORAGE_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, token_storage: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(kind) = token_storage {
            match kind.parse() {
                Ok(kind) => self.token_storage = kind,
                Err(e) => warn!(error = %e, "Ignoring {}", TOKEN_STORAGE_ENV),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn device_id_timeout(&self) -> Duration {
        Duration::from_millis(self.device_id_timeout_ms)
    }

    /// Token store backed by the configured durable storage.
    pub fn token_store(&self) -> Result<Arc<TokenStore>> {
        let store = match self.token_storage {
            TokenStorageKind::File => TokenStore::new(FileTokenStorage::new(self.cache_dir()?)),
            TokenStorageKind::Keyring => TokenStore::new(KeyringTokenStorage::new()),
        };
        Ok(Arc::new(store))
    }

    /// Device id resolver for the configured source. A generated id that
    /// cannot be persisted disables the header rather than failing startup.
    pub fn device_id_resolver(&self) -> DeviceIdResolver {
        match self.device_id_source {
            DeviceIdSource::MachineId => {
                DeviceIdResolver::with_bridge(Arc::new(MachineIdProvider::new()))
                    .timeout(self.device_id_timeout())
            }
            DeviceIdSource::Generated => {
                match Self::config_dir().and_then(|dir| load_or_create_device_id(&dir)) {
                    Ok(id) => DeviceIdResolver::with_fallback(id),
                    Err(e) => {
                        warn!(error = %e, "Could not load device id, header disabled");
                        DeviceIdResolver::disabled()
                    }
                }
            }
        }
    }
}
