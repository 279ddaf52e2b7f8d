//! Ports to the collaborator store that owns users, OAuth credentials and
//! application records. The engine never talks to a database directly.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::models::application::ApplicationRecord;
use crate::models::credential::OAuthCredential;
use crate::models::user::{User, UserId};

pub mod postgres;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Option<User>, StoreError>;

    /// Users with auto-apply on, counting users without an explicit flag as
    /// `enabled_by_default`. Used to resume runs at boot.
    async fn list_auto_apply_users(&self, enabled_by_default: bool)
        -> Result<Vec<UserId>, StoreError>;

    async fn set_auto_apply(&self, id: UserId, enabled: bool) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<OAuthCredential>, StoreError>;

    async fn save(&self, credential: &OAuthCredential) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, record: &ApplicationRecord) -> Result<(), StoreError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApplicationRecord>, StoreError>;

    /// Vacancies with a `Submitted` or `FailedPermanent` record for the user.
    async fn terminal_vacancy_ids(&self, user_id: UserId) -> Result<HashSet<String>, StoreError>;

    /// Records whose submission reached the platform in `[from, until)`.
    async fn count_submitted_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u32, StoreError>;
}
