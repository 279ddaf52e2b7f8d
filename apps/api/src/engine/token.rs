//! OAuth access-token lifecycle for the recruitment platform.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::errors::{ExternalError, TokenError};
use crate::models::credential::{AccessToken, OAuthCredential};
use crate::models::user::UserId;
use crate::platform::OAuthProvider;
use crate::store::CredentialStore;

/// Upper bound on a granted lifetime; guards the expiry arithmetic.
const MAX_GRANT_SECS: i64 = 366 * 24 * 60 * 60;

pub struct TokenManager {
    credentials: Arc<dyn CredentialStore>,
    oauth: Arc<dyn OAuthProvider>,
    clock: Arc<dyn Clock>,
    cache: DashMap<UserId, OAuthCredential>,
    safety_margin: chrono::Duration,
    timeout: Duration,
}

impl TokenManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        oauth: Arc<dyn OAuthProvider>,
        clock: Arc<dyn Clock>,
        safety_margin: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            oauth,
            clock,
            cache: DashMap::new(),
            safety_margin: chrono::Duration::from_std(safety_margin)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            timeout,
        }
    }

    /// Returns a token that stays valid for at least the safety margin,
    /// refreshing it first when needed.
    ///
    /// No map guard is held while the refresh call is in flight; the
    /// scheduler's single-flight rule keeps refreshes for one user serial.
    pub async fn get_valid_token(&self, user: UserId) -> Result<AccessToken, TokenError> {
        let credential = self.current_credential(user).await?;
        let now = self.clock.now();
        if credential.is_valid_at(now + self.safety_margin) {
            return Ok(credential.access_token);
        }

        info!(user_id = %user, "Access token near expiry, refreshing");
        let grant = match tokio::time::timeout(
            self.timeout,
            self.oauth.refresh(credential.refresh_token.expose()),
        )
        .await
        {
            Err(_) => return Err(TokenError::Unavailable(ExternalError::Timeout(self.timeout))),
            Ok(Err(e @ (ExternalError::Rejected(_) | ExternalError::Unauthorized(_)))) => {
                warn!(user_id = %user, "Refresh token rejected: {e}");
                self.cache.remove(&user);
                return Err(TokenError::AuthorizationExpired {
                    user_id: user,
                    reason: e.to_string(),
                });
            }
            Ok(Err(e)) => return Err(TokenError::Unavailable(e)),
            Ok(Ok(grant)) => grant,
        };

        let refreshed = OAuthCredential {
            user_id: user,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: self.clock.now()
                + chrono::Duration::seconds(grant.expires_in_secs.clamp(0, MAX_GRANT_SECS)),
        };
        self.credentials.save(&refreshed).await?;
        self.cache.insert(user, refreshed.clone());
        Ok(refreshed.access_token)
    }

    /// Forces the next `get_valid_token` for `user` to refresh.
    pub fn invalidate(&self, user: UserId) {
        if let Some(mut credential) = self.cache.get_mut(&user) {
            credential.expires_at = DateTime::<Utc>::MIN_UTC;
        }
    }

    async fn current_credential(&self, user: UserId) -> Result<OAuthCredential, TokenError> {
        if let Some(cached) = self.cache.get(&user).map(|c| c.clone()) {
            return Ok(cached);
        }
        let loaded = self
            .credentials
            .load(user)
            .await?
            .ok_or_else(|| TokenError::AuthorizationExpired {
                user_id: user,
                reason: "no platform authorization on file".to_string(),
            })?;
        self.cache.insert(user, loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::models::credential::RefreshToken;
    use crate::test_support::{FakeOAuth, FixedClock, MemoryCredentialStore};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup(
        expires_in: i64,
    ) -> (TokenManager, Arc<MemoryCredentialStore>, Arc<FakeOAuth>, UserId) {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryCredentialStore::default());
        store.put(OAuthCredential {
            user_id: user,
            access_token: AccessToken::new("old"),
            refresh_token: RefreshToken::new("refresh-1"),
            expires_at: start() + chrono::Duration::seconds(expires_in),
        });
        let oauth = Arc::new(FakeOAuth::default());
        let manager = TokenManager::new(
            store.clone(),
            oauth.clone(),
            Arc::new(FixedClock::new(start())),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        (manager, store, oauth, user)
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_without_refresh() {
        let (manager, _, oauth, user) = setup(3600);
        let token = manager.get_valid_token(user).await.unwrap();
        assert_eq!(token.expose(), "old");
        assert_eq!(oauth.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_inside_safety_margin_is_refreshed_and_saved() {
        let (manager, store, oauth, user) = setup(30);
        let token = manager.get_valid_token(user).await.unwrap();
        assert_eq!(token.expose(), "fresh-1");
        assert_eq!(oauth.calls(), 1);

        let saved = store.get(user).unwrap();
        assert_eq!(saved.access_token.expose(), "fresh-1");
        assert_eq!(saved.refresh_token.expose(), "refresh-next-1");
        assert_eq!(saved.expires_at, start() + chrono::Duration::seconds(3600));

        // Cached now; no second exchange.
        manager.get_valid_token(user).await.unwrap();
        assert_eq!(oauth.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let (manager, _, oauth, user) = setup(3600);
        manager.get_valid_token(user).await.unwrap();
        manager.invalidate(user);
        let token = manager.get_valid_token(user).await.unwrap();
        assert_eq!(token.expose(), "fresh-1");
        assert_eq!(oauth.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_authorization_expired() {
        let (manager, _, oauth, user) = setup(0);
        oauth.fail_with(ExternalError::Rejected("invalid_grant".into()));
        let err = manager.get_valid_token(user).await.unwrap_err();
        assert!(matches!(err, TokenError::AuthorizationExpired { .. }));
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_is_unavailable() {
        let (manager, _, oauth, user) = setup(0);
        oauth.fail_with(ExternalError::transient("503"));
        let err = manager.get_valid_token(user).await.unwrap_err();
        assert!(matches!(err, TokenError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_is_authorization_expired() {
        let (manager, _, _, _) = setup(3600);
        let err = manager.get_valid_token(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TokenError::AuthorizationExpired { .. }));
    }
}
