//! Authentication module for sessions and the token lifecycle.
//!
//! This module provides:
//! - `token`: bearer token payload codec (expiry/identity claims)
//! - `TokenStore`: durable token slot that survives restarts
//! - `SessionController`: login/logout/refresh with single-flight refresh
//! - `TokenManager`: activity-gated proactive refresh state machine
//! - `CredentialStore`: OS-keychain storage for remembered credentials

pub mod credentials;
pub mod manager;
pub mod session;
pub mod store;
pub mod token;

pub use credentials::CredentialStore;
pub use manager::TokenManager;
pub use session::{SessionController, SessionEvent};
pub use store::{StoredToken, TokenStore};
