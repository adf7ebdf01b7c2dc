//! Client configuration management.
//!
//! This module handles loading and saving the client configuration,
//! which includes the backend base URL, the last used username, and the
//! token-lifecycle tuning knobs.
//!
//! Configuration is stored at `~/.config/easysight/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "easysight";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the configured base URL
const BASE_URL_ENV: &str = "EASYSIGHT_BASE_URL";

/// Default backend base URL
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// All endpoints live under a single versioned prefix. Older deployments
/// mixed `/api/v1` and `/v1`; the prefix is one configured constant here.
pub const API_PREFIX: &str = "/api/v1";

/// User-interaction event kinds that count as activity for the
/// token lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEvent {
    MouseDown,
    MouseMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityEvent {
    /// The full set of recognized activity events.
    pub fn all() -> Vec<ActivityEvent> {
        vec![
            ActivityEvent::MouseDown,
            ActivityEvent::MouseMove,
            ActivityEvent::KeyPress,
            ActivityEvent::Scroll,
            ActivityEvent::TouchStart,
            ActivityEvent::Click,
        ]
    }
}

/// Token-lifecycle tuning knobs.
///
/// Durations are stored as milliseconds so the file stays readable and
/// matches the backend's configuration conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// How long before expiry a token counts as "expiring soon" (default 5 minutes)
    pub expiry_warning_ms: u64,
    /// Interval between periodic token checks (default 1 minute)
    pub check_interval_ms: u64,
    /// Inactivity window after which monitoring stops (default 5 minutes)
    pub activity_timeout_ms: u64,
    /// Which interaction events count as activity
    pub activity_events: Vec<ActivityEvent>,
    /// Emit info-level traces for token lifecycle transitions
    pub log_token_events: bool,
    /// Check the token immediately on user activity
    pub check_on_activity: bool,
    /// Check the token before each outbound request
    pub check_before_request: bool,
    /// Check the token on navigation between console routes
    pub check_on_route_change: bool,
    /// Days before the durable token slot expires regardless of the
    /// token's own embedded expiry (default 7 days)
    pub store_retention_days: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_warning_ms: 5 * 60 * 1000,
            check_interval_ms: 60 * 1000,
            activity_timeout_ms: 5 * 60 * 1000,
            activity_events: ActivityEvent::all(),
            log_token_events: true,
            check_on_activity: true,
            check_before_request: true,
            check_on_route_change: true,
            store_retention_days: 7,
        }
    }
}

impl TokenConfig {
    pub fn expiry_warning(&self) -> Duration {
        Duration::milliseconds(self.expiry_warning_ms as i64)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.check_interval_ms)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::milliseconds(self.activity_timeout_ms as i64)
    }

    pub fn store_retention(&self) -> Duration {
        Duration::days(self.store_retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub last_username: Option<String>,
    #[serde(default)]
    pub token: TokenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            last_username: None,
            token: TokenConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.is_empty() {
                config.base_url = url;
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for durable client-side state (token slot).
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
