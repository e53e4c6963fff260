use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::AccessToken;

/// Token file name in cache directory
const TOKEN_FILE: &str = "token.json";

/// Durable key-value slot holding the persisted access token.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<AccessToken>>;
    fn save(&self, token: &AccessToken) -> Result<()>;
    fn delete(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedToken {
    access_token: AccessToken,
    saved_at: DateTime<Utc>,
}

/// Stores the token as JSON in the cache directory.
pub struct FileTokenStorage {
    cache_dir: PathBuf,
}

impl FileTokenStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<AccessToken>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read token file")?;
        let persisted: PersistedToken =
            serde_json::from_str(&contents).context("Failed to parse token file")?;
        Ok(Some(persisted.access_token))
    }

    fn save(&self, token: &AccessToken) -> Result<()> {
        let path = self.token_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = PersistedToken {
            access_token: token.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, contents).context("Failed to write token file")?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

/// Process-local storage. Clones share the same slot, which lets tests
/// simulate a restart by building a fresh `TokenStore` over a clone.
#[derive(Clone, Default)]
pub struct MemoryTokenStorage {
    slot: Arc<Mutex<Option<AccessToken>>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<AccessToken>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Token slot lock poisoned"))?;
        Ok(slot.clone())
    }

    fn save(&self, token: &AccessToken) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Token slot lock poisoned"))?;
        *slot = Some(token.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Token slot lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// In-memory token plus a counter bumped by every write.
#[derive(Default)]
struct Slot {
    token: Option<AccessToken>,
    generation: u64,
}

/// Single source of truth for the current bearer token.
///
/// The in-memory copy wins; durable storage is consulted only when memory is
/// empty. Storage failures are logged and swallowed since they only affect
/// staying logged in across restarts.
///
/// Writers persist first and publish to memory second. A token loaded from
/// storage is cached only if no write happened while it was being read, so a
/// concurrent clear cannot be undone by a reader.
pub struct TokenStore {
    memory: RwLock<Slot>,
    writer: Mutex<()>,
    storage: Box<dyn TokenStorage>,
}

impl TokenStore {
    pub fn new(storage: impl TokenStorage + 'static) -> Self {
        Self {
            memory: RwLock::new(Slot::default()),
            writer: Mutex::new(()),
            storage: Box::new(storage),
        }
    }

    /// Store without any durable mirror.
    pub fn in_memory() -> Self {
        Self::new(MemoryTokenStorage::new())
    }

    fn read_slot(&self) -> (Option<AccessToken>, u64) {
        let slot = self.memory.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        (slot.token.clone(), slot.generation)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.memory.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_token(&self, token: Option<AccessToken>) {
        // Keeps storage and memory in the same order across concurrent writers
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = match token {
            Some(ref token) => self.storage.save(token),
            None => self.storage.delete(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist access token");
        }

        let mut slot = self.write_slot();
        slot.token = token;
        slot.generation += 1;
    }

    pub fn get_token(&self) -> Option<AccessToken> {
        let (cached, generation) = self.read_slot();
        if cached.is_some() {
            return cached;
        }

        let loaded = match self.storage.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted access token");
                None
            }
        };

        let mut slot = self.write_slot();
        if slot.generation != generation {
            // A set or clear landed while storage was read; it wins
            return slot.token.clone();
        }
        if let Some(ref token) = loaded {
            debug!("Restored access token from storage");
            slot.token = Some(token.clone());
        }
        loaded
    }

    pub fn clear_token(&self) {
        self.set_token(None);
    }

    pub fn has_token(&self) -> bool {
        self.get_token().is_some()
    }
}
