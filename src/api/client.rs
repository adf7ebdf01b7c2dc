//! Generic authenticated request layer for the EasySight backend.
//!
//! Every console API call goes through `ApiClient`: it attaches the
//! bearer header from the token store, optionally refreshes a token
//! that is about to expire before sending, and on a 401 response runs
//! one single-flight refresh followed by one retry with the new token.
//! A failed recovery tears the session down (idempotently) and the
//! categorized error propagates to the caller.
//!
//! Login and logout never pass through here - they live on the auth
//! bindings, where a 401 has different meaning (see `api::auth`).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::{SessionController, TokenManager};
use crate::config::{Config, API_PREFIX};
use crate::models::ApiResponse;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow diagnosis queries while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the EasySight backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    check_before_request: bool,
    session: SessionController,
    manager: TokenManager,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        session: SessionController,
        manager: TokenManager,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_http_client(client, config, session, manager))
    }

    /// Build over an existing reqwest client, sharing its connection pool.
    pub fn with_http_client(
        client: Client,
        config: &Config,
        session: SessionController,
        manager: TokenManager,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            check_before_request: config.token.check_before_request,
            session,
            manager,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        // Pre-empt an imminent expiry before attaching the header; a
        // failed refresh here is non-fatal - the response path handles
        // the eventual 401
        if self.check_before_request {
            if let Err(e) = self.manager.check_and_refresh_token().await {
                warn!(error = %e, "Pre-request token refresh failed, sending with current token");
            }
        }

        let token = self.session.access_token()?;
        let response = self
            .send_with_backoff(method.clone(), path, body, token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return self.recover_unauthorized(method, path, body).await;
        }

        Self::parse_response(response).await
    }

    /// 401 recovery: one single-flight refresh, one retry. Concurrent
    /// failing requests coalesce on the session's refresh gate and all
    /// observe the same outcome.
    async fn recover_unauthorized<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        debug!(path, "Received 401, attempting token refresh");

        let new_token = match self.session.refresh_token().await {
            Ok(token) => token,
            Err(e) => {
                // NotAuthenticated means another caller already tore the
                // session down; expire_session is idempotent either way
                if !matches!(
                    e.downcast_ref::<ApiError>(),
                    Some(ApiError::NotAuthenticated)
                ) {
                    self.session.expire_session();
                }
                return Err(e.context("Session refresh after 401 failed"));
            }
        };

        let response = self
            .send_with_backoff(method, path, body, Some(&new_token))
            .await?;
        Self::parse_response(response).await
    }

    /// Send one request, retrying only on 429 with exponential backoff.
    async fn send_with_backoff<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self.client.request(method.clone(), &url);
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited.into());
            }
            warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    /// Categorize failures and unwrap the response envelope.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::from_status(status, &text).into());
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse response body ({} bytes)", text.len()))?;

        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request failed".to_string());
            return Err(ApiError::InvalidResponse(message).into());
        }

        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::api::test_support::MockAuthApi;
    use crate::auth::token::test_support::token_with_exp;
    use crate::auth::{SessionEvent, TokenStore};
    use crate::models::LoginRequest;
    use crate::utils::{Clock, SystemClock};

    /// Local backend that accepts exactly one bearer token and counts
    /// how many requests reach it.
    struct StubBackend {
        accepted: Mutex<String>,
        hits: AtomicUsize,
    }

    impl StubBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                accepted: Mutex::new(String::new()),
                hits: AtomicUsize::new(0),
            })
        }

        fn accept(&self, token: &str) {
            *self.accepted.lock().unwrap() = token.to_string();
        }
    }

    async fn camera_endpoint(
        State(backend): State<Arc<StubBackend>>,
        headers: HeaderMap,
    ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
        backend.hits.fetch_add(1, Ordering::SeqCst);
        let expected = format!("Bearer {}", backend.accepted.lock().unwrap());
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth == expected {
            (
                axum::http::StatusCode::OK,
                Json(json!({"data": {"id": 1, "name": "gate-cam"}})),
            )
        } else {
            (
                axum::http::StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Not authenticated"})),
            )
        }
    }

    async fn spawn_backend(backend: Arc<StubBackend>) -> String {
        let app = Router::new()
            .route("/api/v1/cameras/1", get(camera_endpoint))
            .with_state(backend);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve stub backend");
        });
        format!("http://{}", addr)
    }

    struct Fixture {
        api: Arc<MockAuthApi>,
        backend: Arc<StubBackend>,
        store: TokenStore,
        session: SessionController,
        client: ApiClient,
        _dir: tempfile::TempDir,
    }

    async fn fixture(check_before_request: bool) -> Fixture {
        let api = Arc::new(MockAuthApi::new());
        let backend = StubBackend::new();
        let base_url = spawn_backend(backend.clone()).await;

        let dir = tempfile::tempdir().expect("tempdir");
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = TokenStore::new(dir.path().to_path_buf(), Duration::days(7), clock.clone());
        let mut config = Config::default();
        config.base_url = base_url;
        config.token.check_before_request = check_before_request;

        let session = SessionController::new(
            api.clone(),
            store.clone(),
            clock.clone(),
            config.token.clone(),
        );
        let manager = TokenManager::new(
            config.token.clone(),
            store.clone(),
            session.clone(),
            clock,
        );
        let client =
            ApiClient::with_http_client(Client::new(), &config, session.clone(), manager);
        Fixture {
            api,
            backend,
            store,
            session,
            client,
            _dir: dir,
        }
    }

    fn hour_token(hours: i64) -> String {
        token_with_exp("operator1", (Utc::now() + Duration::hours(hours)).timestamp())
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let fx = fixture(false).await;
        // Fresh by expiry, but the backend no longer accepts it
        fx.store
            .set(&hour_token(1), Some("refresh-token"))
            .expect("seed store");
        let renewed = hour_token(2);
        fx.backend.accept(&renewed);
        fx.api.queue_token(&renewed);

        let camera: serde_json::Value = fx.client.get("/cameras/1").await.expect("request");
        assert_eq!(camera["name"], "gate-cam");
        assert_eq!(fx.api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.backend.hits.load(Ordering::SeqCst),
            2,
            "one 401 then one retry with the new token"
        );
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let fx = fixture(false).await;
        fx.store
            .set(&hour_token(1), Some("refresh-token"))
            .expect("seed store");
        let renewed = hour_token(2);
        fx.backend.accept(&renewed);
        fx.api.queue_token(&renewed);
        *fx.api.refresh_delay.lock().unwrap() = StdDuration::from_millis(100);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let client = fx.client.clone();
                tokio::spawn(async move { client.get::<serde_json::Value>("/cameras/1").await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        for result in results {
            let camera = result.expect("task").expect("request");
            assert_eq!(camera["id"], 1);
        }
        assert_eq!(
            fx.api.refresh_calls.load(Ordering::SeqCst),
            1,
            "all rejected requests coalesce on one refresh"
        );
    }

    #[tokio::test]
    async fn test_failed_recovery_expires_session() {
        let fx = fixture(false).await;
        fx.session
            .login(&LoginRequest {
                username: "operator1".to_string(),
                password: "secret".to_string(),
                remember_me: None,
            })
            .await
            .expect("login");
        fx.api.fail_refresh.store(true, Ordering::SeqCst);
        let mut events = fx.session.subscribe();

        fx.client
            .get::<serde_json::Value>("/cameras/1")
            .await
            .expect_err("recovery must fail");

        assert!(!fx.session.is_logged_in());
        assert!(fx.store.get().expect("get").is_none());
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::SessionExpired
        );
        assert_eq!(fx.api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_request_refresh_inside_warning_window() {
        let fx = fixture(true).await;
        let expiring =
            token_with_exp("operator1", (Utc::now() + Duration::seconds(10)).timestamp());
        fx.store
            .set(&expiring, Some("refresh-token"))
            .expect("seed store");
        let renewed = hour_token(1);
        fx.backend.accept(&renewed);
        fx.api.queue_token(&renewed);

        let camera: serde_json::Value = fx.client.get("/cameras/1").await.expect("request");
        assert_eq!(camera["id"], 1);
        assert_eq!(fx.api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.backend.hits.load(Ordering::SeqCst),
            1,
            "refreshed before sending, the backend never sees a stale token"
        );
    }

    #[tokio::test]
    async fn test_pre_request_check_skips_fresh_token() {
        let fx = fixture(true).await;
        let token = hour_token(1);
        fx.store.set(&token, None).expect("seed store");
        fx.backend.accept(&token);

        let camera: serde_json::Value = fx.client.get("/cameras/1").await.expect("request");
        assert_eq!(camera["name"], "gate-cam");
        assert_eq!(fx.api.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.backend.hits.load(Ordering::SeqCst), 1);
    }
}
