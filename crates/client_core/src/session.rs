//! Turning token responses into [`Session`]s.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use shared::{
    domain::{Identity, Session},
    protocol::TokenResponse,
};

/// Tokens this close to expiry are refreshed before use.
pub const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Reads the claims of an access token without checking its signature.
/// Only the backend can verify the token; the client just needs `exp`.
pub fn peek_claims(access_token: &str) -> Option<AccessClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match jsonwebtoken::decode::<AccessClaims>(
        access_token,
        &DecodingKey::from_secret(&[]),
        &validation,
    ) {
        Ok(data) => Some(data.claims),
        Err(err) => {
            tracing::debug!("access token is not a readable jwt: {err}");
            None
        }
    }
}

/// Absolute expiry: explicit `expires_at`, then `expires_in`, then the token's `exp`.
pub fn resolve_expiry(
    access_token: &str,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if let Some(at) = expires_at.and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
        return Some(at);
    }
    // An out-of-range lifetime counts as unknown expiry.
    if let Some(seconds) = expires_in {
        return Duration::try_seconds(seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));
    }
    peek_claims(access_token)
        .and_then(|claims| claims.exp)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

pub fn session_from_tokens(tokens: TokenResponse, now: DateTime<Utc>) -> Session {
    let expires_at = resolve_expiry(
        &tokens.access_token,
        tokens.expires_at,
        tokens.expires_in,
        now,
    );
    Session {
        identity: tokens.user.to_identity(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.filter(|token| !token.is_empty()),
        expires_at,
    }
}

pub fn session_for_identity(
    identity: Identity,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Session {
    Session {
        identity,
        access_token,
        refresh_token: refresh_token.filter(|token| !token.is_empty()),
        expires_at,
    }
}

pub fn expiry_leeway() -> Duration {
    Duration::seconds(EXPIRY_LEEWAY_SECS)
}
