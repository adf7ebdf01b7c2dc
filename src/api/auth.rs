//! Auth endpoint bindings.
//!
//! Login, logout, refresh and profile calls live behind the `AuthApi`
//! trait so the session controller and the token lifecycle manager can
//! be exercised against an in-memory backend in tests. `HttpAuthApi` is
//! the production implementation over reqwest.
//!
//! These calls deliberately bypass the generic request layer: a 401
//! from login means wrong credentials, and a 401 from logout means the
//! session is already gone - neither should trigger a refresh.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::API_PREFIX;
use crate::models::{
    ApiResponse, ChangePasswordRequest, LoginRequest, LoginResponse, RefreshResponse, User,
};

use super::ApiError;

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;
    async fn logout(&self, token: &str) -> Result<()>;
    async fn refresh(&self, token: &str, refresh_token: Option<&str>) -> Result<RefreshResponse>;
    async fn current_user(&self, token: &str) -> Result<User>;
    async fn change_password(&self, token: &str, request: &ChangePasswordRequest) -> Result<()>;
}

/// Production auth bindings against the EasySight backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/auth{}", self.base_url, API_PREFIX, path)
    }

    /// Check if response is successful, returning a categorized error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Parse the response envelope, surfacing business failures.
    async fn parse_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check_response(response).await?;
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .context("Failed to parse auth response")?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request failed".to_string());
            return Err(ApiError::InvalidResponse(message).into());
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let response = self
            .client
            .post(self.url("/login"))
            .json(request)
            .send()
            .await
            .context("Failed to send login request")?;
        Self::parse_envelope(response).await
    }

    async fn logout(&self, token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/logout"))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send logout request")?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn refresh(&self, token: &str, refresh_token: Option<&str>) -> Result<RefreshResponse> {
        let mut builder = self.client.post(self.url("/refresh")).bearer_auth(token);
        if let Some(refresh_token) = refresh_token {
            builder = builder.json(&json!({ "refresh_token": refresh_token }));
        }
        let response = builder
            .send()
            .await
            .context("Failed to send refresh request")?;
        Self::parse_envelope(response).await
    }

    async fn current_user(&self, token: &str) -> Result<User> {
        let response = self
            .client
            .get(self.url("/me"))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to fetch current user")?;
        Self::parse_envelope(response).await
    }

    async fn change_password(&self, token: &str, request: &ChangePasswordRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url("/change-password"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .context("Failed to send change-password request")?;
        Self::check_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    //! In-memory auth backend with call counters for session and
    //! lifecycle tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub struct MockAuthApi {
        pub login_calls: AtomicUsize,
        pub logout_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub current_user_calls: AtomicUsize,
        pub fail_login: AtomicBool,
        pub fail_refresh: AtomicBool,
        pub fail_logout: AtomicBool,
        pub fail_current_user: AtomicBool,
        /// Delay applied to refresh calls so tests can pile up waiters
        pub refresh_delay: Mutex<Duration>,
        /// Tokens handed out by successive refresh calls
        pub next_tokens: Mutex<Vec<String>>,
    }

    impl MockAuthApi {
        pub fn new() -> Self {
            Self {
                login_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                current_user_calls: AtomicUsize::new(0),
                fail_login: AtomicBool::new(false),
                fail_refresh: AtomicBool::new(false),
                fail_logout: AtomicBool::new(false),
                fail_current_user: AtomicBool::new(false),
                refresh_delay: Mutex::new(Duration::ZERO),
                next_tokens: Mutex::new(Vec::new()),
            }
        }

        pub fn queue_token(&self, token: &str) {
            self.next_tokens.lock().unwrap().push(token.to_string());
        }

        pub fn test_user(username: &str) -> User {
            let role = if username == "admin" { "admin" } else { "operator" };
            User {
                id: 1,
                username: username.to_string(),
                email: None,
                full_name: None,
                role: role.to_string(),
                roles: vec![role.to_string()],
                is_active: true,
                avatar: None,
                phone: None,
                department: None,
                permissions: vec!["camera:read".to_string()],
                page_permissions: HashMap::from([("/cameras".to_string(), true)]),
                last_login: None,
                created_at: None,
                updated_at: None,
            }
        }

        fn take_token(&self, fallback: &str) -> String {
            let mut tokens = self.next_tokens.lock().unwrap();
            if tokens.is_empty() {
                fallback.to_string()
            } else {
                tokens.remove(0)
            }
        }
    }

    #[async_trait]
    impl AuthApi for MockAuthApi {
        async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_login.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthorized.into());
            }
            Ok(LoginResponse {
                access_token: self.take_token("login-token"),
                refresh_token: Some("refresh-token".to_string()),
                token_type: Some("bearer".to_string()),
                expires_in: Some(1800),
                user: Self::test_user(&request.username),
            })
        }

        async fn logout(&self, _token: &str) -> Result<()> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthorized.into());
            }
            Ok(())
        }

        async fn refresh(
            &self,
            _token: &str,
            _refresh_token: Option<&str>,
        ) -> Result<RefreshResponse> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.refresh_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthorized.into());
            }
            Ok(RefreshResponse {
                access_token: self.take_token("refreshed-token"),
                refresh_token: None,
            })
        }

        async fn current_user(&self, _token: &str) -> Result<User> {
            self.current_user_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_current_user.load(Ordering::SeqCst) {
                return Err(ApiError::Unauthorized.into());
            }
            Ok(Self::test_user("restored"))
        }

        async fn change_password(
            &self,
            _token: &str,
            _request: &ChangePasswordRequest,
        ) -> Result<()> {
            Ok(())
        }
    }
}
