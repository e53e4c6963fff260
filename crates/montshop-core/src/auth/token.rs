use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque bearer credential issued by login or refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Body returned by `POST /auth/login` and `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub user: serde_json::Value,
}

impl AuthResponse {
    /// Best-effort display name for the authenticated user
    pub fn user_display(&self) -> String {
        ["name", "login", "email"]
            .iter()
            .find_map(|key| self.user.get(key).and_then(|v| v.as_str()))
            .unwrap_or("unknown user")
            .to_string()
    }
}
