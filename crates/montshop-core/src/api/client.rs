//! API client for communicating with the MontShop REST backend.
//!
//! This module provides the `ApiClient` struct used for every backend call
//! (products, sales, customers, fiscal, ...). It decorates requests with the
//! bearer token and client context headers and recovers from an expired token
//! by refreshing it once per failure episode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{AccessToken, AuthResponse, TokenStore};
use crate::config::Config;
use crate::device::context::{detect_locale, detect_timezone};
use crate::device::{ClientContext, DeviceIdResolver};

use super::refresh::{RefreshCoordinator, RefreshLease, RefreshTicket};
use super::request::{ApiRequest, LOGIN_PATH, REFRESH_PATH};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
}

/// API client for the MontShop backend.
/// Clone is cheap and clones share the token store, the refresh state and the
/// connection pool (including the cookie jar holding the refresh cookie).
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    refresh: RefreshCoordinator,
    device: DeviceIdResolver,
    timezone: Option<String>,
    locale: Option<String>,
}

impl ApiClient {
    /// Create a new API client for `base_url`
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Result<Self> {
        Self::with_timeout(base_url, tokens, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            tokens,
            refresh: RefreshCoordinator::new(),
            device: DeviceIdResolver::disabled(),
            timezone: detect_timezone(),
            locale: detect_locale(),
        })
    }

    /// Build a client from the application config, with its token storage and
    /// device id source.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tokens = config.token_store()?;
        Ok(Self::with_timeout(&config.api_base_url, tokens, config.request_timeout())?
            .with_device(config.device_id_resolver()))
    }

    pub fn with_device(mut self, device: DeviceIdResolver) -> Self {
        self.device = device;
        self
    }

    /// Override the detected timezone and locale headers
    pub fn with_locale(mut self, timezone: Option<String>, locale: Option<String>) -> Self {
        self.timezone = timezone;
        self.locale = locale;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.has_token()
    }

    // ===== Authentication =====

    /// Log in with user credentials and store the issued token
    pub async fn login(&self, login: &str, password: &str) -> Result<AuthResponse> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { login, password })?;
        let response = self.execute(request).await?;
        let auth: AuthResponse = response
            .json()
            .await
            .context("Failed to parse login response")?;

        self.tokens.set_token(Some(auth.access_token.clone()));
        info!(user = %auth.user_display(), "Logged in");
        Ok(auth)
    }

    /// Forget the current token. The refresh cookie is left to expire server-side.
    pub fn logout(&self) {
        self.tokens.clear_token();
        info!("Logged out");
    }

    /// Refresh the access token now, joining an in-flight refresh if any.
    pub async fn refresh(&self) -> Result<AccessToken> {
        match self.refresh.begin() {
            RefreshTicket::Lead(lease) => self.lead_refresh(lease).await,
            RefreshTicket::Wait(waiter) => match waiter.await {
                Ok(Some(token)) => Ok(token),
                _ => Err(ApiError::RefreshFailed("concurrent refresh failed".to_string()).into()),
            },
        }
    }

    /// Perform the refresh call for an episode this task leads, then release
    /// every waiter with the outcome.
    async fn lead_refresh(&self, lease: RefreshLease) -> Result<AccessToken> {
        match self.request_refresh().await {
            Ok(auth) => {
                let token = auth.access_token;
                self.tokens.set_token(Some(token.clone()));
                lease.settle(Some(token.clone()));
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                self.tokens.clear_token();
                lease.settle(None);
                warn!(error = %e, "Access token refresh failed, session cleared");
                Err(e.into())
            }
        }
    }

    /// The refresh call itself. Sent without decoration and never intercepted.
    async fn request_refresh(&self) -> std::result::Result<AuthResponse, ApiError> {
        let url = ApiRequest::post(REFRESH_PATH).url(&self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let cause = ApiError::from_status(status, &body);
            return Err(ApiError::RefreshFailed(format!("{} ({})", status, cause)));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::RefreshFailed(format!("invalid refresh response: {}", e)))
    }

    // ===== Request pipeline =====

    /// Send a request, transparently refreshing the token on a 401.
    ///
    /// Returns the successful response; any non-2xx outcome is an `ApiError`.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<reqwest::Response> {
        let token = self.tokens.get_token();
        let response = self.dispatch(&request, token.as_ref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.can_refresh() {
            return Self::check_response(response).await;
        }

        request.mark_retried();
        debug!(method = %request.method, path = %request.path, "Unauthorized, refreshing token");

        match self.refresh.begin() {
            RefreshTicket::Lead(lease) => {
                let token = self.lead_refresh(lease).await?;
                self.replay(&request, &token).await
            }
            RefreshTicket::Wait(waiter) => match waiter.await {
                Ok(Some(token)) => self.replay(&request, &token).await,
                _ => Err(ApiError::Unauthorized.into()),
            },
        }
    }

    /// Re-issue a request once with a freshly issued token.
    async fn replay(&self, request: &ApiRequest, token: &AccessToken) -> Result<reqwest::Response> {
        debug!(method = %request.method, path = %request.path, "Replaying request with refreshed token");
        let response = self.dispatch(request, Some(token)).await?;
        Self::check_response(response).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
    ) -> Result<reqwest::Response> {
        let url = request.url(&self.base_url);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(self.request_headers(token).await?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, retried = request.is_retried(), "Sending request");
        builder
            .send()
            .await
            .map_err(ApiError::NetworkError)
            .with_context(|| format!("Failed to send {} request to {}", request.method, url))
    }

    /// Bearer token, device id and time context headers for one request.
    async fn request_headers(&self, token: Option<&AccessToken>) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&token.bearer())?,
            );
        }

        let device_id = self.device.resolve().await;
        ClientContext::at(
            Local::now().fixed_offset(),
            device_id,
            self.timezone.clone(),
            self.locale.clone(),
        )
        .apply(&mut headers);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    // ===== JSON helpers =====

    /// Execute a request and parse its JSON body. An empty body parses as `null`,
    /// so `()` and `Option<T>` work for endpoints that return nothing.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let url = request.url(&self.base_url);
        let response = self.execute(request).await?;
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;
        let body = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(body)
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::delete(path)).await
    }
}
