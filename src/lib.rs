//! Core client library for the EasySight console.
//!
//! EasySight is a video-surveillance/AI-diagnosis platform; its
//! consoles (desktop, TUI, embedded panels) talk to the backend over
//! REST with JWT bearer authentication. This crate owns the hard part
//! of that conversation: the token lifecycle. It decodes token expiry,
//! refreshes proactively while the user is active, coalesces
//! concurrent refresh attempts into a single backend call, and runs
//! the 401 refresh-then-retry protocol for every outbound request.
//!
//! `EasySightClient` is the composition root: it wires the token
//! store, session controller, lifecycle manager and request client
//! together and keeps the manager in step with session start/end.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, SessionController, SessionEvent, TokenManager, TokenStore};
pub use config::{ActivityEvent, Config, TokenConfig};
pub use models::{LoginRequest, User};

use api::{AuthApi, HttpAuthApi};
use utils::{Clock, SystemClock};

/// HTTP request timeout in seconds for the shared reqwest client.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fully wired EasySight client.
pub struct EasySightClient {
    config: Config,
    api: ApiClient,
    session: SessionController,
    manager: TokenManager,
}

impl EasySightClient {
    /// Build a client from configuration, storing tokens under the
    /// platform cache directory.
    pub fn new(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = TokenStore::new(
            config.cache_dir()?,
            config.token.store_retention(),
            clock.clone(),
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let auth_api: Arc<dyn AuthApi> =
            Arc::new(HttpAuthApi::new(http.clone(), config.base_url.clone()));
        Ok(Self::from_parts(config, auth_api, store, clock, http))
    }

    fn from_parts(
        config: Config,
        auth_api: Arc<dyn AuthApi>,
        store: TokenStore,
        clock: Arc<dyn Clock>,
        http: reqwest::Client,
    ) -> Self {
        let session = SessionController::new(
            auth_api,
            store.clone(),
            clock.clone(),
            config.token.clone(),
        );
        let manager = TokenManager::new(
            config.token.clone(),
            store,
            session.clone(),
            clock,
        );
        let api = ApiClient::with_http_client(http, &config, session.clone(), manager.clone());
        Self {
            config,
            api,
            session,
            manager,
        }
    }

    /// Log in and start token monitoring.
    pub async fn login(&self, request: &LoginRequest) -> Result<User> {
        let user = self.session.login(request).await?;
        self.manager.start_monitoring();
        Ok(user)
    }

    /// Log out and stop token monitoring. Local teardown always
    /// proceeds, even if the backend call fails.
    pub async fn logout(&self) -> Result<()> {
        self.manager.stop_monitoring();
        self.session.logout().await
    }

    /// Try to restore a persisted session on startup; when it
    /// succeeds, monitoring starts.
    pub async fn restore(&self) -> Result<bool> {
        let restored = self.session.restore().await?;
        if restored {
            self.manager.start_monitoring();
        }
        Ok(restored)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
