use thiserror::Error;

use crate::models::ErrorBody;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not authenticated - no active session")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Extract a display message from an error response body,
    /// falling back to the truncated raw body.
    fn body_message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.display_message())
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::body_message(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            422 => ApiError::Validation(message),
            429 => ApiError::RateLimited,
            502..=504 => ApiError::ServiceUnavailable(message),
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, r#"{"detail": "no"}"#),
            ApiError::AccessDenied(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_validation_messages_joined() {
        let body = r#"{"detail": [
            {"loc": ["body", "name"], "msg": "field required", "type": "value_error"},
            {"loc": ["body", "url"], "msg": "invalid url", "type": "value_error"}
        ]}"#;
        match ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body) {
            ApiError::Validation(msg) => assert_eq!(msg, "field required, invalid url"),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_long_body_truncated() {
        let body = "x".repeat(2000);
        match ApiError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(msg) => {
                assert!(msg.contains("truncated"));
                assert!(msg.len() < 600);
            }
            other => panic!("expected ServerError, got {:?}", other),
        }
    }
}
