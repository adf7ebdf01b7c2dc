//! Token lifecycle manager.
//!
//! Watches the stored access token and refreshes it ahead of expiry.
//! Two states: Idle (no poll task) and Monitoring (periodic check).
//! Monitoring starts on session start or user activity and stops when
//! the token disappears, the user goes quiet for the activity timeout,
//! or the console is hidden.
//!
//! Each poll tick:
//! - token absent: stop
//! - expired: refresh; failure is fatal (session expires, stop)
//! - expiring soon: refresh; failure is retried next tick
//! - otherwise: no-op
//!
//! All refreshes route through the session controller's single-flight
//! gate, so a scheduled check and an interceptor-triggered check can
//! never issue two concurrent refresh calls.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ActivityEvent, TokenConfig};
use crate::utils::Clock;

use super::session::SessionController;
use super::store::TokenStore;
use super::token;

/// Whether the poll loop should keep running after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    Stop,
}

struct MonitorState {
    last_activity: DateTime<Utc>,
    // Bumped on every start so a finished poll task only clears the
    // slot it was spawned for
    generation: u64,
    poll_task: Option<JoinHandle<()>>,
}

/// Token lifecycle manager. Clone is cheap - state is shared behind an
/// Arc so the request layer and the embedding app hold the same instance.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: TokenConfig,
    store: TokenStore,
    session: SessionController,
    clock: Arc<dyn Clock>,
    monitor: Mutex<MonitorState>,
}

impl TokenManager {
    pub fn new(
        config: TokenConfig,
        store: TokenStore,
        session: SessionController,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_activity = clock.now();
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                session,
                clock,
                monitor: Mutex::new(MonitorState {
                    last_activity,
                    generation: 0,
                    poll_task: None,
                }),
            }),
        }
    }

    /// Start the periodic check. The first check runs immediately,
    /// then every `check_interval`. Any previous poll is replaced,
    /// never stacked, so a start landing while an old poll is winding
    /// down always leaves monitoring on.
    pub fn start_monitoring(&self) {
        let mut monitor = self.lock_monitor();
        if let Some(task) = monitor.poll_task.take() {
            task.abort();
        }

        if self.inner.config.log_token_events {
            info!("Starting token monitoring");
        }

        let manager = self.clone();
        let interval = self.inner.config.check_interval();
        monitor.generation += 1;
        let generation = monitor.generation;
        monitor.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if manager.tick().await == TickOutcome::Stop {
                    break;
                }
            }
            // Natural exit: clear our own slot so activity can restart
            // us; a restart may have replaced it with a newer poll
            let mut monitor = manager.lock_monitor();
            if monitor.generation == generation {
                monitor.poll_task = None;
            }
        }));
    }

    /// Cancel the periodic check deterministically.
    pub fn stop_monitoring(&self) {
        let mut monitor = self.lock_monitor();
        if let Some(task) = monitor.poll_task.take() {
            task.abort();
            if self.inner.config.log_token_events {
                info!("Stopped token monitoring");
            }
        }
    }

    /// Whether the periodic check is active.
    pub fn is_monitoring(&self) -> bool {
        self.lock_monitor().poll_task.is_some()
    }

    /// One scheduled check: activity gating first, then token state.
    pub(crate) async fn tick(&self) -> TickOutcome {
        let now = self.inner.clock.now();
        let idle_for = {
            let monitor = self.lock_monitor();
            now - monitor.last_activity
        };
        if idle_for >= self.inner.config.activity_timeout() {
            if self.inner.config.log_token_events {
                info!("No user activity, pausing token monitoring");
            }
            return TickOutcome::Stop;
        }

        self.check_token_status().await
    }

    /// Evaluate the stored token and refresh when warranted.
    async fn check_token_status(&self) -> TickOutcome {
        let stored = match self.inner.store.get() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No token in store, stopping monitor");
                return TickOutcome::Stop;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read token store");
                return TickOutcome::Continue;
            }
        };

        let now = self.inner.clock.now();
        let access_token = &stored.access_token;

        if token::is_expired(access_token, now) {
            if self.inner.config.log_token_events {
                info!("Token expired, attempting refresh");
            }
            match self.inner.session.refresh_token().await {
                Ok(_) => TickOutcome::Continue,
                Err(e) => {
                    error!(error = %e, "Refresh of expired token failed, ending session");
                    self.inner.session.expire_session();
                    TickOutcome::Stop
                }
            }
        } else if token::is_expiring_soon(access_token, now, self.inner.config.expiry_warning()) {
            if self.inner.config.log_token_events {
                info!("Token expiring soon, attempting refresh");
            }
            if let Err(e) = self.inner.session.refresh_token().await {
                // Soft attempt: the token is still valid, retry next tick
                warn!(error = %e, "Proactive refresh failed, will retry");
            }
            TickOutcome::Continue
        } else {
            TickOutcome::Continue
        }
    }

    /// Report a user-interaction event. Filtered by the configured
    /// event set; restarts monitoring if idle and performs an immediate
    /// out-of-band refresh when the token is about to expire.
    pub async fn record_activity(&self, event: ActivityEvent) {
        if !self.inner.config.activity_events.contains(&event) {
            return;
        }
        self.touch_activity().await;
    }

    /// Console visibility change. Hidden stops polling immediately to
    /// conserve resources; visible counts as activity plus an
    /// immediate check.
    pub async fn set_visible(&self, visible: bool) {
        if visible {
            self.touch_activity().await;
            if self.check_token_status().await == TickOutcome::Stop {
                self.stop_monitoring();
            }
        } else {
            self.stop_monitoring();
        }
    }

    /// Navigation between console routes, gated by configuration.
    pub async fn on_route_change(&self) -> Result<bool> {
        if !self.inner.config.check_on_route_change {
            return Ok(false);
        }
        self.check_and_refresh_token().await
    }

    /// Manual check-and-refresh entry point for the request layer.
    /// Idempotent: a fresh token means no work and no network calls.
    /// Returns whether a refresh was performed.
    pub async fn check_and_refresh_token(&self) -> Result<bool> {
        let Some(stored) = self.inner.store.get()? else {
            return Ok(false);
        };

        let now = self.inner.clock.now();
        let access_token = &stored.access_token;
        if token::is_expired(access_token, now)
            || token::is_expiring_soon(access_token, now, self.inner.config.expiry_warning())
        {
            self.inner.session.refresh_token().await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn touch_activity(&self) {
        let now = self.inner.clock.now();
        {
            let mut monitor = self.lock_monitor();
            monitor.last_activity = now;
        }

        let stored = match self.inner.store.get() {
            Ok(Some(stored)) => stored,
            _ => return,
        };

        // Refresh before re-arming the poll so the restarted monitor
        // starts from a settled token state
        if self.inner.config.check_on_activity
            && token::is_expiring_soon(
                &stored.access_token,
                now,
                self.inner.config.expiry_warning(),
            )
        {
            if self.inner.config.log_token_events {
                info!("Token expiring soon at user activity, refreshing now");
            }
            if let Err(e) = self.inner.session.refresh_token().await {
                warn!(error = %e, "Activity-triggered refresh failed");
            }
        }

        if !self.is_monitoring() {
            self.start_monitoring();
        }
    }

    fn lock_monitor(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
