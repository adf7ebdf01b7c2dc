//! Session controller.
//!
//! Owns the login/logout/refresh operations and the in-memory user and
//! permission state. Refresh is single-flight: at most one refresh call
//! is in flight against the backend at any time, and every concurrent
//! caller observes the outcome of that one call. The waiter queue is
//! drained on every settle path so no caller is left pending.
//!
//! Refresh failure does not tear the session down here - the caller
//! decides (the lifecycle manager treats an expired-token failure as
//! fatal, an expiring-soon failure as retryable; the request layer
//! tears down after a failed 401 recovery). `expire_session` is
//! idempotent and emits `SessionExpired` exactly once per incident.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthApi};
use crate::config::TokenConfig;
use crate::models::{ChangePasswordRequest, LoginRequest, User};
use crate::utils::Clock;

use super::credentials::CredentialStore;
use super::store::TokenStore;
use super::token;

/// Capacity of the session event channel. Events are small and
/// subscribers are UI-side; lagging receivers just miss old events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session lifecycle notifications for the embedding application.
/// `SessionExpired` is the cue to prompt for re-authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    SessionExpired,
}

#[derive(Debug, Clone)]
struct SessionState {
    user: User,
    permissions: Vec<String>,
    page_permissions: HashMap<String, bool>,
}

/// Outcome shared with queued refresh waiters. The error side is a
/// rendered message because the underlying errors are not Clone.
type SharedOutcome = Result<String, String>;

enum RefreshSlot {
    Idle,
    InFlight(Vec<oneshot::Sender<SharedOutcome>>),
}

/// Session controller. Clone is cheap - state is shared behind an Arc.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    api: Arc<dyn AuthApi>,
    store: TokenStore,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    state: RwLock<Option<SessionState>>,
    refresh_slot: Mutex<RefreshSlot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: TokenStore,
        clock: Arc<dyn Clock>,
        config: TokenConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                api,
                store,
                clock,
                config,
                state: RwLock::new(None),
                refresh_slot: Mutex::new(RefreshSlot::Idle),
                events,
            }),
        }
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Authenticate and install the session. A 401 here is wrong
    /// credentials and surfaces directly - no refresh is attempted.
    pub async fn login(&self, request: &LoginRequest) -> Result<User> {
        let response = self
            .inner
            .api
            .login(request)
            .await
            .context("Login failed")?;

        self.inner.store.set(
            &response.access_token,
            response.refresh_token.as_deref(),
        )?;
        self.install_state(response.user.clone());

        // Remember-me goes to the OS keychain, best-effort; unchecking
        // it forgets any previously remembered password
        match request.remember_me {
            Some(true) => {
                if let Err(e) = CredentialStore::remember(&request.username, &request.password) {
                    warn!(error = %e, "Failed to store remembered credentials");
                }
            }
            Some(false) => {
                if let Err(e) = CredentialStore::forget(&request.username) {
                    warn!(error = %e, "Failed to forget remembered credentials");
                }
            }
            None => {}
        }

        info!(username = %response.user.username, "Logged in");
        let _ = self.inner.events.send(SessionEvent::LoggedIn);
        Ok(response.user)
    }

    /// Log out. The network call is best-effort: local teardown always
    /// proceeds, even when the backend rejects the call (a 401 here
    /// just means the session was already gone).
    pub async fn logout(&self) -> Result<()> {
        if let Some(stored) = self.inner.store.get()? {
            if let Err(e) = self.inner.api.logout(&stored.access_token).await {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }

        self.teardown_local();
        info!("Logged out");
        let _ = self.inner.events.send(SessionEvent::LoggedOut);
        Ok(())
    }

    /// Re-adopt a persisted token on startup. The token must decode,
    /// be unexpired, and pass backend validation via the profile
    /// endpoint; anything less clears the slot.
    pub async fn restore(&self) -> Result<bool> {
        let Some(stored) = self.inner.store.get()? else {
            return Ok(false);
        };

        if token::is_expired(&stored.access_token, self.inner.clock.now()) {
            debug!("Stored token is expired, discarding");
            self.inner.store.clear()?;
            return Ok(false);
        }

        match self.inner.api.current_user(&stored.access_token).await {
            Ok(user) => {
                info!(username = %user.username, "Session restored from storage");
                self.install_state(user);
                let _ = self.inner.events.send(SessionEvent::LoggedIn);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Stored token failed validation, discarding");
                self.inner.store.clear()?;
                Ok(false)
            }
        }
    }

    /// Refresh the access token. Single-flight: if a refresh is
    /// already in flight, enqueue and share its outcome; otherwise
    /// lead the refresh and resolve every queued waiter with the
    /// result. Returns the (possibly new) access token.
    pub async fn refresh_token(&self) -> Result<String> {
        let rx = {
            let mut slot = self
                .inner
                .refresh_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match &mut *slot {
                RefreshSlot::InFlight(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshSlot::Idle => {
                    *slot = RefreshSlot::InFlight(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = rx {
            return match rx.await {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(message)) => Err(ApiError::RefreshFailed(message).into()),
                Err(_) => Err(ApiError::RefreshFailed("refresh was abandoned".into()).into()),
            };
        }

        // Leader path: perform the refresh, then drain the queue with
        // the shared outcome no matter how it settled.
        let result = self.do_refresh().await;

        let shared: SharedOutcome = match &result {
            Ok(token) => Ok(token.clone()),
            Err(e) => Err(format!("{e:#}")),
        };
        let waiters = {
            let mut slot = self
                .inner
                .refresh_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *slot, RefreshSlot::Idle)
        };
        if let RefreshSlot::InFlight(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(shared.clone());
            }
        }

        result
    }

    async fn do_refresh(&self) -> Result<String> {
        let stored = self
            .inner
            .store
            .get()?
            .ok_or(ApiError::NotAuthenticated)?;

        let response = self
            .inner
            .api
            .refresh(&stored.access_token, stored.refresh_token.as_deref())
            .await
            .context("Token refresh failed")?;

        // A refresh that does not rotate the companion keeps the old one
        let refresh_token = response.refresh_token.or(stored.refresh_token);
        self.inner
            .store
            .set(&response.access_token, refresh_token.as_deref())?;

        if self.inner.config.log_token_events {
            info!("Access token refreshed");
        }
        Ok(response.access_token)
    }

    /// Idempotent local teardown after a terminal refresh failure.
    /// Emits `SessionExpired` only for the first caller of an incident;
    /// returns whether this call performed the teardown.
    pub fn expire_session(&self) -> bool {
        let expired = {
            // Serialize against concurrent expirers via the state lock
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let had_state = state.take().is_some();
            let had_token = matches!(self.inner.store.get(), Ok(Some(_)));
            if let Err(e) = self.inner.store.clear() {
                warn!(error = %e, "Failed to clear token store");
            }
            had_state || had_token
        };

        if expired {
            info!("Session expired, re-authentication required");
            let _ = self.inner.events.send(SessionEvent::SessionExpired);
        }
        expired
    }

    /// Change the current user's password.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let stored = self
            .inner
            .store
            .get()?
            .ok_or(ApiError::NotAuthenticated)?;
        let request = ChangePasswordRequest {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.inner
            .api
            .change_password(&stored.access_token, &request)
            .await
            .context("Password change failed")
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> Result<Option<String>> {
        Ok(self.inner.store.get()?.map(|s| s.access_token))
    }

    /// Whether a session is installed in memory.
    pub fn is_logged_in(&self) -> bool {
        self.read_state().is_some()
    }

    /// Snapshot of the current user, if logged in.
    pub fn current_user(&self) -> Option<User> {
        self.read_state().map(|s| s.user)
    }

    /// Permission check. Admins hold every permission; `"*"` grants all.
    pub fn has_permission(&self, permission: &str) -> bool {
        match self.read_state() {
            Some(state) => {
                state.user.role == "admin"
                    || state.permissions.iter().any(|p| p == permission || p == "*")
            }
            None => false,
        }
    }

    /// Exact role check; admins pass every role gate.
    pub fn has_role(&self, role: &str) -> bool {
        self.read_state()
            .map(|s| s.user.role == role || s.user.role == "admin")
            .unwrap_or(false)
    }

    /// Hierarchical role check: viewer < operator < admin. Unknown
    /// roles rank below viewer.
    pub fn has_minimum_role(&self, required: &str) -> bool {
        self.read_state()
            .map(|s| Self::role_level(&s.user.role) >= Self::role_level(required))
            .unwrap_or(false)
    }

    fn role_level(role: &str) -> u8 {
        match role {
            "admin" => 3,
            "operator" => 2,
            "viewer" => 1,
            _ => 0,
        }
    }

    /// Password remembered for a username, for prefilling the login
    /// form. Absent or unreadable keychain entries read as `None`.
    pub fn remembered_password(&self, username: &str) -> Option<String> {
        CredentialStore::recall(username)
    }

    /// Whether the console route is visible to the current user.
    pub fn has_page_permission(&self, path: &str) -> bool {
        self.read_state()
            .map(|s| s.page_permissions.get(path).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    fn install_state(&self, user: User) {
        let state = SessionState {
            permissions: user.permissions.clone(),
            page_permissions: user.page_permissions.clone(),
            user,
        };
        let mut guard = self
            .inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(state);
    }

    fn teardown_local(&self) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.take();
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear token store");
        }
    }

    fn read_state(&self) -> Option<SessionState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
