//! MontShop client core.
//!
//! This crate holds the parts of the point-of-sale client that carry real
//! logic rather than UI glue:
//!
//! - `api`: the authenticated REST client with single-flight token refresh
//! - `auth`: access token types and the token store with durable storage
//! - `device`: device identifier and client time context used to decorate requests
//! - `barcode`: EAN-13 scale label decoding and scanner keystroke buffering
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod barcode;
pub mod config;
pub mod device;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{AccessToken, AuthResponse, TokenStore};
pub use config::Config;
