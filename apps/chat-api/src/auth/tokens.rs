//! Access token verification.
//!
//! Tokens are HS256 JWTs issued by the auth service with the username in
//! `sub`. Both sides share `SECRET_KEY`; this server only verifies, except
//! for [`issue_access_token`] which local tooling and tests use.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Access token lifetime in seconds (24 hours).
pub const ACCESS_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
}

/// Sign an access token for `username`, valid for `ttl_secs`.
pub fn issue_access_token(secret: &str, username: &str, ttl_secs: i64) -> Result<String, ApiError> {
    let claims = AccessClaims {
        sub: username.to_string(),
        exp: Utc::now().timestamp() + ttl_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(?e, "failed to sign access token");
        ApiError::internal("Token signing failed")
    })
}

/// Verify signature and expiry, returning the claims.
pub fn verify_access_token(secret: &str, token: &str) -> Result<AccessClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(?e, "access token validation failed");
        ApiError::unauthorized("Invalid or expired token")
    })?;

    if data.claims.sub.trim().is_empty() {
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_to_username() {
        let token = issue_access_token(SECRET, "alice", 60).unwrap();
        let claims = verify_access_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_access_token("other-secret", "alice", 60).unwrap();
        let err = verify_access_token(SECRET, &token).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn expired_token_is_rejected() {
        // Past the default 60s leeway.
        let token = issue_access_token(SECRET, "alice", -120).unwrap();
        assert!(verify_access_token(SECRET, &token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_access_token(SECRET, "not.a.jwt").is_err());
    }
}
