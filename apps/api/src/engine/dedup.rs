//! Remembers which vacancies a user is done with, and how often a vacancy
//! failed transiently.
//!
//! Terminal application records are the durable answer. Processed markers in
//! the key-value store only cover the gap between a submit and its record
//! insert, so a marker expiring or a restart with an in-memory store never
//! makes a finished vacancy eligible again.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::StoreError;
use crate::kv::KvStore;
use crate::models::user::UserId;
use crate::models::vacancy::VacancyCandidate;
use crate::store::ApplicationStore;

const KEY_PREFIX: &str = "autoapply";

pub struct Deduplicator {
    kv: Arc<dyn KvStore>,
    applications: Arc<dyn ApplicationStore>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(kv: Arc<dyn KvStore>, applications: Arc<dyn ApplicationStore>, ttl: Duration) -> Self {
        Self {
            kv,
            applications,
            ttl,
        }
    }

    fn processed_key(user: UserId, vacancy_id: &str) -> String {
        format!("{KEY_PREFIX}:processed:{user}:{vacancy_id}")
    }

    fn failures_key(user: UserId, vacancy_id: &str) -> String {
        format!("{KEY_PREFIX}:failures:{user}:{vacancy_id}")
    }

    async fn has_marker(&self, user: UserId, vacancy_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .kv
            .get(&Self::processed_key(user, vacancy_id))
            .await?
            .is_some())
    }

    pub async fn already_processed(
        &self,
        user: UserId,
        vacancy_id: &str,
    ) -> Result<bool, StoreError> {
        if self.has_marker(user, vacancy_id).await? {
            return Ok(true);
        }
        Ok(self
            .applications
            .terminal_vacancy_ids(user)
            .await?
            .contains(vacancy_id))
    }

    /// Drops candidates that reached a terminal state in an earlier cycle.
    pub async fn filter(
        &self,
        user: UserId,
        candidates: Vec<VacancyCandidate>,
    ) -> Result<Vec<VacancyCandidate>, StoreError> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let terminal = self.applications.terminal_vacancy_ids(user).await?;
        let mut fresh = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if terminal.contains(&candidate.id) || self.has_marker(user, &candidate.id).await? {
                continue;
            }
            fresh.push(candidate);
        }
        Ok(fresh)
    }

    /// Excludes the vacancy until its terminal record is stored, and clears
    /// its failure count.
    pub async fn mark_processed(&self, user: UserId, vacancy_id: &str) -> Result<(), StoreError> {
        self.kv
            .set(&Self::processed_key(user, vacancy_id), "1", Some(self.ttl))
            .await?;
        self.kv.del(&Self::failures_key(user, vacancy_id)).await
    }

    /// Counts one more transient failure and returns the running total.
    pub async fn record_failure(&self, user: UserId, vacancy_id: &str) -> Result<u32, StoreError> {
        let key = Self::failures_key(user, vacancy_id);
        let count = self.kv.incr(&key).await?;
        self.kv.expire(&key, self.ttl).await?;
        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }
}
