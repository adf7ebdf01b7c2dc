//! Data models for the EasySight console backend.
//!
//! This module contains the data structures exchanged with the
//! EasySight REST API:
//!
//! - `User`: account profile with role and permission grants
//! - `LoginRequest`, `LoginResponse`, `RefreshResponse`: auth payloads
//! - `ApiResponse`, `PaginatedResponse`: generic response envelopes
//! - `ErrorBody`: error response body with optional field-level detail

pub mod api;
pub mod user;

pub use api::{ApiResponse, ErrorBody, PaginatedResponse};
pub use user::{ChangePasswordRequest, LoginRequest, LoginResponse, RefreshResponse, User};
