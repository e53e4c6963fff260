use anyhow::{Context, Result};
use keyring::Entry;

use super::{AccessToken, TokenStorage};

const SERVICE_NAME: &str = "montshop";

/// Fixed keychain account under which the access token is kept
const TOKEN_ACCOUNT: &str = "access_token";

/// Keeps the access token in the OS keychain.
pub struct KeyringTokenStorage {
    service: String,
}

impl KeyringTokenStorage {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Use a different keychain service name (e.g. per backend environment)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, TOKEN_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl Default for KeyringTokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringTokenStorage {
    fn load(&self) -> Result<Option<AccessToken>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(AccessToken::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn save(&self, token: &AccessToken) -> Result<()> {
        self.entry()?
            .set_password(token.secret())
            .context("Failed to store token in keychain")
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}
