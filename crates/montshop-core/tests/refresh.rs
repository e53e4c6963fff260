//! Integration tests for the authenticated client against a mock backend.
//!
//! The backend is a small axum router bound to an ephemeral port. Protected
//! routes accept only the currently valid token; `/auth/refresh` rotates it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use montshop_core::auth::{FileTokenStorage, MemoryTokenStorage};
use montshop_core::device::DeviceIdResolver;
use montshop_core::{AccessToken, ApiClient, ApiError, TokenStore};

struct Backend {
    valid_token: Mutex<String>,
    next_token: String,
    refresh_status: u16,
    refresh_delay: Duration,
    require_cookie: bool,
    always_reject: bool,
    refresh_calls: AtomicUsize,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl Backend {
    fn new() -> Self {
        Self {
            valid_token: Mutex::new("T1".to_string()),
            next_token: "T2".to_string(),
            refresh_status: 200,
            refresh_delay: Duration::from_millis(200),
            require_cookie: false,
            always_reject: false,
            refresh_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn calls_with(&self, auth: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(_, a)| a.as_deref() == Some(auth))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<serde_json::Value>) -> Response {
    if body["login"] != "caixa01" || body["password"] != "secret" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    *backend.valid_token.lock().expect("token lock") = "T1".to_string();
    (
        [(header::SET_COOKIE, "refresh_token=r1; HttpOnly; Path=/")],
        Json(json!({"access_token": "T1", "user": {"login": "caixa01", "name": "Caixa 01"}})),
    )
        .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(backend.refresh_delay).await;

    if backend.require_cookie {
        let has_cookie = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|c| c.contains("refresh_token=r1"))
            .unwrap_or(false);
        if !has_cookie {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    if backend.refresh_status != 200 {
        return StatusCode::from_u16(backend.refresh_status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    *backend.valid_token.lock().expect("token lock") = backend.next_token.clone();
    Json(json!({"access_token": backend.next_token, "user": {"login": "caixa01"}})).into_response()
}

async fn item(
    State(backend): State<Arc<Backend>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let auth = bearer(&headers);
    backend
        .calls
        .lock()
        .expect("calls lock")
        .push((name.clone(), auth.clone()));

    let expected = format!("Bearer {}", backend.valid_token.lock().expect("token lock"));
    if !backend.always_reject && auth.as_deref() == Some(expected.as_str()) {
        Json(json!({"item": name})).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn echo(headers: HeaderMap) -> Json<serde_json::Value> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "authorization": header_value("authorization"),
        "device_id": header_value("x-device-id"),
        "datetime": header_value("x-client-datetime"),
        "timezone": header_value("x-client-timezone"),
        "utc_offset": header_value("x-client-utc-offset"),
        "locale": header_value("x-client-locale"),
    }))
}

async fn spawn_backend(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/items/{name}", get(item))
        .route("/echo", get(echo))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

fn client_with_token(base_url: &str, token: Option<&str>) -> ApiClient {
    let tokens = Arc::new(TokenStore::in_memory());
    tokens.set_token(token.map(AccessToken::new));
    ApiClient::new(base_url, tokens).expect("client builds")
}

fn api_error(err: &anyhow::Error) -> &ApiError {
    err.downcast_ref::<ApiError>()
        .unwrap_or_else(|| panic!("expected ApiError, got {err:#}"))
}

#[tokio::test]
async fn successful_refresh_replays_all_waiters() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("stale"));

    let (a, b, c) = tokio::join!(
        client.get::<serde_json::Value>("/items/a"),
        client.get::<serde_json::Value>("/items/b"),
        client.get::<serde_json::Value>("/items/c"),
    );

    assert_eq!(a.expect("a succeeds")["item"], "a");
    assert_eq!(b.expect("b succeeds")["item"], "b");
    assert_eq!(c.expect("c succeeds")["item"], "c");

    assert_eq!(backend.refresh_count(), 1);
    let mut replayed = backend.calls_with("Bearer T2");
    replayed.sort();
    assert_eq!(replayed, vec!["a", "b", "c"]);
    assert_eq!(client.tokens().get_token(), Some(AccessToken::new("T2")));
    assert_eq!(client.refresh_coordinator().episodes(), 1);
    assert!(!client.refresh_coordinator().is_refreshing());
}

#[tokio::test]
async fn failed_refresh_rejects_everyone_and_clears_token() {
    let mut backend = Backend::new();
    backend.refresh_status = 403;
    let backend = Arc::new(backend);
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("stale"));

    let (a, b) = tokio::join!(
        client.get::<serde_json::Value>("/items/a"),
        client.get::<serde_json::Value>("/items/b"),
    );

    let a = a.expect_err("a rejected");
    let b = b.expect_err("b rejected");
    assert!(api_error(&a).is_session_lost());
    assert!(api_error(&b).is_session_lost());
    // The leader reports the refresh failure, the waiter its original 401
    let refresh_failures = [&a, &b]
        .iter()
        .filter(|e| matches!(api_error(e), ApiError::RefreshFailed(_)))
        .count();
    assert_eq!(refresh_failures, 1);

    assert_eq!(backend.refresh_count(), 1);
    assert!(backend.calls_with("Bearer T2").is_empty());
    assert_eq!(client.tokens().get_token(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_across_threads() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("stale"));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<serde_json::Value>(&format!("/items/{i}")).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let body = result.expect("task joined").expect("request succeeds");
        assert!(body["item"].is_string());
    }
    assert_eq!(backend.refresh_count(), 1);
    assert_eq!(backend.calls_with("Bearer T2").len(), 8);
}

#[tokio::test]
async fn rejected_replay_is_not_retried_again() {
    let mut backend = Backend::new();
    backend.always_reject = true;
    backend.refresh_delay = Duration::from_millis(0);
    let backend = Arc::new(backend);
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("stale"));

    let err = client
        .get::<serde_json::Value>("/items/a")
        .await
        .expect_err("second 401 is surfaced");
    assert!(matches!(api_error(&err), ApiError::Unauthorized));

    assert_eq!(backend.refresh_count(), 1);
    assert_eq!(backend.calls.lock().expect("calls lock").len(), 2);
    // The refreshed token survives; only a failed refresh clears it
    assert_eq!(client.tokens().get_token(), Some(AccessToken::new("T2")));
}

#[tokio::test]
async fn login_401_never_triggers_refresh() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, None);

    let err = client
        .login("caixa01", "wrong")
        .await
        .expect_err("bad password");
    assert!(matches!(api_error(&err), ApiError::Unauthorized));
    assert_eq!(backend.refresh_count(), 0);
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn refresh_401_is_terminal() {
    let mut backend = Backend::new();
    backend.refresh_status = 401;
    backend.refresh_delay = Duration::from_millis(0);
    let backend = Arc::new(backend);
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("stale"));

    let err = client.refresh().await.expect_err("refresh rejected");
    assert!(matches!(api_error(&err), ApiError::RefreshFailed(_)));
    assert_eq!(backend.refresh_count(), 1);
    assert_eq!(client.tokens().get_token(), None);
}

#[tokio::test]
async fn refresh_uses_cookie_from_login() {
    let mut backend = Backend::new();
    backend.require_cookie = true;
    backend.refresh_delay = Duration::from_millis(0);
    let backend = Arc::new(backend);
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, None);

    let auth = client.login("caixa01", "secret").await.expect("login");
    assert_eq!(auth.access_token, AccessToken::new("T1"));
    assert_eq!(auth.user_display(), "Caixa 01");

    // Server-side rotation makes T1 stale
    *backend.valid_token.lock().expect("token lock") = "rotated".to_string();

    let body: serde_json::Value = client.get("/items/x").await.expect("refreshed and replayed");
    assert_eq!(body["item"], "x");
    assert_eq!(backend.refresh_count(), 1);
    assert_eq!(client.tokens().get_token(), Some(AccessToken::new("T2")));
}

#[tokio::test]
async fn other_errors_pass_through() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend.clone()).await;
    let client = client_with_token(&url, Some("T1"));

    let err = client
        .get::<serde_json::Value>("/broken")
        .await
        .expect_err("server error");
    assert!(matches!(api_error(&err), ApiError::ServerError(body) if body == "boom"));

    let err = client
        .get::<serde_json::Value>("/missing")
        .await
        .expect_err("not found");
    assert!(matches!(api_error(&err), ApiError::NotFound(_)));
    assert_eq!(backend.refresh_count(), 0);
    assert_eq!(client.tokens().get_token(), Some(AccessToken::new("T1")));
}

#[tokio::test]
async fn requests_carry_context_headers() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend).await;
    let client = client_with_token(&url, Some("T1"))
        .with_device(DeviceIdResolver::with_fallback("pdv-03"))
        .with_locale(Some("America/Sao_Paulo".into()), Some("pt-BR".into()));

    let echoed: serde_json::Value = client.get("/echo").await.expect("echo");
    assert_eq!(echoed["authorization"], "Bearer T1");
    assert_eq!(echoed["device_id"], "pdv-03");
    assert_eq!(echoed["timezone"], "America/Sao_Paulo");
    assert_eq!(echoed["locale"], "pt-BR");
    assert!(echoed["datetime"].as_str().is_some_and(|d| d.ends_with('Z')));
    assert!(echoed["utc_offset"].as_str().is_some_and(|o| o.parse::<i32>().is_ok()));
}

#[tokio::test]
async fn unresolvable_device_id_omits_header() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend).await;
    let client = client_with_token(&url, None).with_device(DeviceIdResolver::disabled());

    let echoed: serde_json::Value = client.get("/echo").await.expect("echo");
    assert!(echoed["device_id"].is_null());
    assert!(echoed["authorization"].is_null());
}

#[tokio::test]
async fn token_survives_restart_with_file_storage() {
    let backend = Arc::new(Backend::new());
    let url = spawn_backend(backend).await;
    let dir = tempfile::tempdir().expect("temp dir");

    let first = ApiClient::new(
        &url,
        Arc::new(TokenStore::new(FileTokenStorage::new(dir.path().to_path_buf()))),
    )
    .expect("client builds");
    first.login("caixa01", "secret").await.expect("login");

    let restarted = ApiClient::new(
        &url,
        Arc::new(TokenStore::new(FileTokenStorage::new(dir.path().to_path_buf()))),
    )
    .expect("client builds");
    assert!(restarted.is_authenticated());
    let body: serde_json::Value = restarted.get("/items/z").await.expect("authorized");
    assert_eq!(body["item"], "z");

    restarted.logout();
    let after_logout = TokenStore::new(FileTokenStorage::new(dir.path().to_path_buf()));
    assert_eq!(after_logout.get_token(), None);
}

#[tokio::test]
async fn memory_storage_restart_round_trip() {
    let storage = MemoryTokenStorage::new();
    TokenStore::new(storage.clone()).set_token(Some(AccessToken::new("x")));
    assert_eq!(TokenStore::new(storage.clone()).get_token(), Some(AccessToken::new("x")));

    TokenStore::new(storage.clone()).set_token(None);
    assert_eq!(TokenStore::new(storage).get_token(), None);
}
