//! REST API client module for the MontShop backend.
//!
//! This module provides the `ApiClient` used for every call to the backend.
//! Requests carry a bearer token plus device and time context headers. An
//! expired token is refreshed transparently: concurrent requests that hit a
//! 401 share a single `POST /auth/refresh` and are replayed with the new token.

pub mod client;
pub mod error;
pub mod refresh;
pub mod request;

pub use reqwest::Method;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, RefreshLease, RefreshTicket};
pub use request::ApiRequest;
