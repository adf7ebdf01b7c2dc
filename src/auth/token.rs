//! Bearer token codec.
//!
//! Decodes the payload segment of a JWT-style access token without
//! verifying the signature - the backend is the authority on validity,
//! the client only needs the embedded expiry and identity claims to
//! schedule refreshes.
//!
//! All predicates fail closed: a token that cannot be decoded is
//! treated as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Claims embedded in an EasySight access token payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// Expiry instant, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

/// Decode the payload segment of a token. Returns `None` on any
/// malformed input; callers treat `None` as expired.
pub fn decode(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    // Tolerate padded encoders
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Whether the token is expired at `now`. Undecodable tokens and
/// tokens without an `exp` claim count as expired.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match decode(token).and_then(|c| c.expires_at()) {
        Some(expires_at) => now >= expires_at,
        None => true,
    }
}

/// Whether the token's time-to-expiry at `now` is strictly below
/// `window`. Undecodable tokens count as expiring.
pub fn is_expiring_soon(token: &str, now: DateTime<Utc>, window: Duration) -> bool {
    match decode(token).and_then(|c| c.expires_at()) {
        Some(expires_at) => (expires_at - now) < window,
        None => true,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{make_token, token_with_exp};
    use super::*;
    use serde_json::json;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).single().unwrap()
    }

    #[test]
    fn test_decode_claims() {
        let token = token_with_exp("alice", 1_900_000_000);
        let claims = decode(&token).expect("token should decode");
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.role.as_deref(), Some("operator"));
        assert_eq!(claims.permissions, vec!["camera:read"]);
        assert_eq!(claims.exp, Some(1_900_000_000));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode("").is_none());
        assert!(decode("not-a-token").is_none());
        assert!(decode("a.b.c").is_none());
        assert!(decode("only.!!!invalid-base64!!!.sig").is_none());
        // Valid base64 but not JSON
        let bogus = format!("h.{}.s", URL_SAFE_NO_PAD.encode(b"hello"));
        assert!(decode(&bogus).is_none());
    }

    #[test]
    fn test_expired_classification() {
        let token = token_with_exp("alice", 1000);
        assert!(is_expired(&token, at(1000)));
        assert!(is_expired(&token, at(2000)));
        assert!(!is_expired(&token, at(999)));
    }

    #[test]
    fn test_malformed_is_expired_and_expiring() {
        let now = at(1000);
        assert!(is_expired("garbage", now));
        assert!(is_expiring_soon("garbage", now, Duration::minutes(5)));
        // Missing exp claim fails closed too
        let no_exp = make_token(&json!({"sub": "alice"}));
        assert!(is_expired(&no_exp, now));
        assert!(is_expiring_soon(&no_exp, now, Duration::minutes(5)));
    }

    #[test]
    fn test_expiring_soon_boundary_is_strict() {
        let window = Duration::seconds(300);
        let token = token_with_exp("alice", 1300);
        // Exactly window away: not soon
        assert!(!is_expiring_soon(&token, at(1000), window));
        // One second inside the window: soon
        assert!(is_expiring_soon(&token, at(1001), window));
        // Well before the window: not soon
        assert!(!is_expiring_soon(&token, at(500), window));
    }
}
