//! PostgreSQL adapter for the collaborator store ports.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::application::{ApplicationRecord, ApplicationState};
use crate::models::credential::{AccessToken, OAuthCredential, RefreshToken};
use crate::models::user::{ApplicantProfile, SearchPreferences, User, UserId};
use crate::store::{ApplicationStore, CredentialStore, UserStore};

const USER_COLUMNS: &str = "id, telegram_chat_id, utc_offset_minutes, auto_apply_enabled, \
    search_text, search_area, salary_from, salary_to, experience, employment, \
    platform_resume_id, experience_summary, skills, additional_info, \
    max_applications_per_day, cover_letter_max_length, auto_apply_interval_minutes";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    telegram_chat_id: Option<i64>,
    utc_offset_minutes: i32,
    auto_apply_enabled: Option<bool>,
    search_text: String,
    search_area: Option<String>,
    salary_from: Option<i32>,
    salary_to: Option<i32>,
    experience: Option<String>,
    employment: Option<String>,
    platform_resume_id: String,
    experience_summary: String,
    skills: Vec<String>,
    additional_info: Option<String>,
    max_applications_per_day: Option<i32>,
    cover_letter_max_length: Option<i32>,
    auto_apply_interval_minutes: Option<i32>,
}

fn non_negative(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            telegram_chat_id: row.telegram_chat_id,
            utc_offset_minutes: row.utc_offset_minutes,
            auto_apply_enabled: row.auto_apply_enabled,
            preferences: SearchPreferences {
                text: row.search_text,
                area: row.search_area,
                salary_from: non_negative(row.salary_from),
                salary_to: non_negative(row.salary_to),
                experience: row.experience,
                employment: row.employment,
            },
            profile: ApplicantProfile {
                platform_resume_id: row.platform_resume_id,
                experience_summary: row.experience_summary,
                skills: row.skills,
                additional_info: row.additional_info,
            },
            max_applications_per_day: non_negative(row.max_applications_per_day),
            cover_letter_max_length: non_negative(row.cover_letter_max_length)
                .map(|v| v as usize),
            auto_apply_interval_minutes: non_negative(row.auto_apply_interval_minutes),
        }
    }
}

#[derive(FromRow)]
struct CredentialRow {
    user_id: Uuid,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ApplicationRow {
    id: Uuid,
    user_id: Uuid,
    vacancy_id: String,
    vacancy_title: String,
    employer: String,
    state: String,
    external_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    cover_letter: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for ApplicationRecord {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        let state = ApplicationState::parse(&row.state).ok_or_else(|| {
            StoreError::Corrupt(format!("application {} has unknown state '{}'", row.id, row.state))
        })?;
        Ok(ApplicationRecord {
            id: row.id,
            user_id: row.user_id,
            vacancy_id: row.vacancy_id,
            vacancy_title: row.vacancy_title,
            employer: row.employer,
            state,
            external_id: row.external_id,
            submitted_at: row.submitted_at,
            cover_letter: row.cover_letter,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Port implementations
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_chat_id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn list_auto_apply_users(
        &self,
        enabled_by_default: bool,
    ) -> Result<Vec<UserId>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM users WHERE COALESCE(auto_apply_enabled, $1) ORDER BY created_at",
        )
        .bind(enabled_by_default)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn set_auto_apply(&self, id: UserId, enabled: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET auto_apply_enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn load(&self, user_id: UserId) -> Result<Option<OAuthCredential>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT user_id, access_token, refresh_token, expires_at \
             FROM oauth_credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| OAuthCredential {
            user_id: r.user_id,
            access_token: AccessToken::new(r.access_token),
            refresh_token: RefreshToken::new(r.refresh_token),
            expires_at: r.expires_at,
        }))
    }

    async fn save(&self, credential: &OAuthCredential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_credentials (user_id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(credential.user_id)
        .bind(credential.access_token.expose())
        .bind(credential.refresh_token.expose())
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for PgStore {
    async fn insert(&self, record: &ApplicationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO applications
                (id, user_id, vacancy_id, vacancy_title, employer, state,
                 external_id, submitted_at, cover_letter, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.vacancy_id)
        .bind(&record.vacancy_title)
        .bind(&record.employer)
        .bind(record.state.as_str())
        .bind(&record.external_id)
        .bind(record.submitted_at)
        .bind(&record.cover_letter)
        .bind(&record.failure_reason)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApplicationRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            "SELECT * FROM applications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApplicationRecord::try_from).collect()
    }

    async fn terminal_vacancy_ids(&self, user_id: UserId) -> Result<HashSet<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT vacancy_id FROM applications \
             WHERE user_id = $1 AND state IN ('submitted', 'failed_permanent')",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn count_submitted_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM applications \
             WHERE user_id = $1 AND submitted_at >= $2 AND submitted_at < $3",
        )
        .bind(user_id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_overrides_are_dropped() {
        assert_eq!(non_negative(Some(-1)), None);
        assert_eq!(non_negative(Some(10)), Some(10));
        assert_eq!(non_negative(None), None);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let row = ApplicationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            vacancy_id: "1".into(),
            vacancy_title: "t".into(),
            employer: "e".into(),
            state: "exploded".into(),
            external_id: None,
            submitted_at: None,
            cover_letter: None,
            failure_reason: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            ApplicationRecord::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }
}
