use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::user::UserId;

/// Bearer token for the recruitment platform. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Long-lived OAuth refresh token. Redacted like [`AccessToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

/// OAuth token pair for one user, refreshed in place by the token manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    pub user_id: UserId,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub expires_at: DateTime<Utc>,
}

impl OAuthCredential {
    /// True if the access token is still valid at `instant`.
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.expires_at > instant
    }
}

/// Result of a refresh exchange with the platform's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub expires_in_secs: i64,
}
