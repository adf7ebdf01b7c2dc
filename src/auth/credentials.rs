//! Remembered credentials via the OS keychain.
//!
//! Backs the login form's "remember me" option: checking it stores the
//! password under the service entry for that username, unchecking it
//! forgets it, and the login form prefills from `recall`. Only the
//! password goes to the keychain; the last username lives in the plain
//! config file.

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "easysight-console";

pub struct CredentialStore;

impl CredentialStore {
    /// Remember the password for a username
    pub fn remember(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// Remembered password for a username, if any. Keychain errors
    /// read as "nothing remembered".
    pub fn recall(username: &str) -> Option<String> {
        Self::entry(username).ok()?.get_password().ok()
    }

    /// Forget the remembered password for a username. Forgetting a
    /// username that was never remembered is fine.
    pub fn forget(username: &str) -> Result<()> {
        match Self::entry(username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")
    }
}
