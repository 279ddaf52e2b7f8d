use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::UserId;

/// Outcome of one submission attempt. `Submitted` and `FailedPermanent` are
/// terminal for the (user, vacancy) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    Submitted,
    FailedRetryable,
    FailedPermanent,
}

impl ApplicationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationState::Submitted => "submitted",
            ApplicationState::FailedRetryable => "failed_retryable",
            ApplicationState::FailedPermanent => "failed_permanent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "submitted" => Some(ApplicationState::Submitted),
            "failed_retryable" => Some(ApplicationState::FailedRetryable),
            "failed_permanent" => Some(ApplicationState::FailedPermanent),
            _ => None,
        }
    }

    /// Whether this record excludes the vacancy from future cycles.
    pub fn is_final(&self) -> bool {
        !matches!(self, ApplicationState::FailedRetryable)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub vacancy_id: String,
    pub vacancy_title: String,
    pub employer: String,
    pub state: ApplicationState,
    /// Platform-side identifier, present once submitted.
    pub external_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub cover_letter: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
