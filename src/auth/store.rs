//! Durable token slot.
//!
//! Persists the current access token (and its refresh companion) to a
//! single JSON file in the client cache directory so a session survives
//! restarts. The slot has its own retention window, independent of the
//! token's embedded expiry: entries older than the window read back as
//! absent.
//!
//! Single-writer discipline: only the session controller writes here,
//! and only after a settled login/refresh/logout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::Clock;

/// Token slot file name in the cache directory
const TOKEN_FILE: &str = "token.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub stored_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenStore {
    cache_dir: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(cache_dir: PathBuf, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache_dir,
            retention,
            clock,
        }
    }

    /// Read the current token, if present and within retention.
    pub fn get(&self) -> Result<Option<StoredToken>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents =
            std::fs::read_to_string(&path).context("Failed to read token file")?;
        let stored: StoredToken = match serde_json::from_str(&contents) {
            Ok(stored) => stored,
            // A corrupt slot is the same as an empty one
            Err(_) => return Ok(None),
        };

        if self.clock.now() - stored.stored_at > self.retention {
            return Ok(None);
        }

        Ok(Some(stored))
    }

    /// Overwrite the slot with a new token pair.
    pub fn set(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let stored = StoredToken {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(|t| t.to_string()),
            stored_at: self.clock.now(),
        };

        std::fs::create_dir_all(&self.cache_dir)
            .context("Failed to create cache directory")?;

        let contents = serde_json::to_string_pretty(&stored)?;
        let tmp = self.cache_dir.join(format!("{}.tmp", TOKEN_FILE));
        std::fs::write(&tmp, contents).context("Failed to write token file")?;
        std::fs::rename(&tmp, self.token_path()).context("Failed to replace token file")?;
        Ok(())
    }

    /// Remove the token and its refresh companion.
    pub fn clear(&self) -> Result<()> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove token file")?;
        }
        Ok(())
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }
}
