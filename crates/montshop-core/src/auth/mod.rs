//! Authentication state for the API client.
//!
//! This module provides:
//! - `AccessToken` / `AuthResponse`: the bearer credential and the login/refresh payload
//! - `TokenStore`: in-memory token mirrored to durable storage
//! - `TokenStorage` backends: JSON file, OS keychain via keyring, and memory

pub mod credentials;
pub mod store;
pub mod token;

pub use credentials::KeyringTokenStorage;
pub use store::{FileTokenStorage, MemoryTokenStorage, TokenStorage, TokenStore};
pub use token::{AccessToken, AuthResponse};
