//! REST API layer for the EasySight backend.
//!
//! This module provides the generic authenticated request client with
//! the 401 refresh-and-retry protocol, the auth endpoint bindings, and
//! the error taxonomy.
//!
//! The backend uses JWT bearer token authentication; any endpoint
//! returns 401 exactly when the presented token is invalid or expired.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{AuthApi, HttpAuthApi};
pub use client::ApiClient;
pub use error::ApiError;

#[cfg(test)]
pub use auth::test_support;
