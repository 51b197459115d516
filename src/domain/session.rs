use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Persisted store keys.
pub const ACCESS_TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const PUSH_TOKEN_KEY: &str = "pushToken";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    #[serde(alias = "token")]
    pub access_token: String,
    /// Some backends rotate the refresh token on every exchange; others omit it.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Session {
    pub fn from_tokens(tokens: AuthTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFreshness {
    Fresh,
    /// Expired, or expiring within the configured skew.
    Stale,
    /// Not a JWT or no `exp` claim; only the backend can tell.
    Opaque,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT access token without verifying it.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&decoded).ok()?;
    DateTime::from_timestamp(claim.exp?, 0)
}

pub fn token_freshness(token: &str, now: DateTime<Utc>, skew_secs: i64) -> TokenFreshness {
    if token.trim().is_empty() {
        return TokenFreshness::Stale;
    }

    let Some(expires_at) = token_expiry(token) else {
        return TokenFreshness::Opaque;
    };

    // Out-of-range skew counts as stale.
    let refresh_at = TimeDelta::try_seconds(skew_secs)
        .and_then(|skew| expires_at.checked_sub_signed(skew));
    match refresh_at {
        Some(refresh_at) if refresh_at > now => TokenFreshness::Fresh,
        _ => TokenFreshness::Stale,
    }
}
