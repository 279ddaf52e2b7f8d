//! One auto-apply cycle for one user: search, filter, generate, submit,
//! record, notify.
//!
//! Suspension points are the external calls (token refresh, search,
//! generation, submit, notify) and store writes. Everything between them is
//! plain CPU work. Cancellation is checked before each candidate and again
//! between generation and submit; a submission already sent always runs to
//! completion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::dedup::Deduplicator;
use crate::engine::quota::{QuotaTracker, Reservation};
use crate::engine::token::TokenManager;
use crate::errors::{EngineError, ExternalError, StoreError, TokenError};
use crate::generation::cover_letter::{finalize_letter, CoverLetterRequest};
use crate::generation::generator::ContentGenerator;
use crate::models::application::{ApplicationRecord, ApplicationState};
use crate::models::user::{EffectiveSettings, User, UserId};
use crate::models::vacancy::{rank_order, SearchParams, VacancyCandidate};
use crate::notify::{Notification, NotificationDispatcher};
use crate::platform::VacancySource;
use crate::store::{ApplicationStore, UserStore};

// ────────────────────────────────────────────────────────────────────────────
// Report types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    QuotaExhausted,
    Cancelled,
    /// The platform asked us to back off; remaining candidates wait for a
    /// later cycle.
    RateLimited,
    PlatformUnavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Submitted { application_id: String },
    /// Transient or generation failure; the vacancy stays eligible.
    Deferred { reason: String },
    FailedPermanent { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub vacancy_id: String,
    pub title: String,
    pub employer: String,
    pub outcome: Outcome,
}

/// Summary of one cycle. `attempts` counts candidates that reached an
/// outcome; `succeeded + failed == attempts`.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub fetched: usize,
    pub eligible: usize,
    pub attempts: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub outcomes: Vec<CandidateOutcome>,
    pub stop_reason: StopReason,
}

impl CycleReport {
    fn new(user_id: UserId, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            started_at,
            fetched: 0,
            eligible: 0,
            attempts: 0,
            succeeded: 0,
            failed: 0,
            outcomes: Vec::new(),
            stop_reason: StopReason::Completed,
        }
    }

    fn record(&mut self, candidate: &VacancyCandidate, outcome: Outcome) {
        self.attempts += 1;
        match outcome {
            Outcome::Submitted { .. } => self.succeeded += 1,
            _ => self.failed += 1,
        }
        self.outcomes.push(CandidateOutcome {
            vacancy_id: candidate.id.clone(),
            title: candidate.title.clone(),
            employer: candidate.employer.clone(),
            outcome,
        });
    }
}

/// Why the candidate loop ended before running out of candidates.
enum Halt {
    Stop(StopReason),
    AuthorizationExpired(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// Components a pipeline is built from. Constructed once at start-up.
#[derive(Clone)]
pub struct PipelineDeps {
    pub users: Arc<dyn UserStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub source: Arc<dyn VacancySource>,
    pub generator: Arc<dyn ContentGenerator>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub tokens: Arc<TokenManager>,
    pub quota: Arc<QuotaTracker>,
    pub dedup: Arc<Deduplicator>,
    pub clock: Arc<dyn Clock>,
}

pub struct ApplicationPipeline {
    deps: PipelineDeps,
    config: EngineConfig,
}

impl ApplicationPipeline {
    pub fn new(deps: PipelineDeps, config: EngineConfig) -> Self {
        Self { deps, config }
    }

    /// Runs one cycle. Transient trouble ends up in the report; only an
    /// expired authorization or a store failure comes back as `Err`.
    pub async fn run_cycle(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, EngineError> {
        let user = self
            .deps
            .users
            .get_user(user_id)
            .await?
            .ok_or(EngineError::UserNotFound(user_id))?;
        let settings = user.settings(&self.config.defaults);
        let mut report = CycleReport::new(user_id, self.deps.clock.now());

        if cancel.is_cancelled() {
            report.stop_reason = StopReason::Cancelled;
            return Ok(report);
        }

        let token = match self.deps.tokens.get_valid_token(user_id).await {
            Ok(token) => token,
            Err(TokenError::AuthorizationExpired { reason, .. }) => {
                return Err(EngineError::AuthorizationExpired {
                    reason,
                    report: Box::new(report),
                })
            }
            Err(TokenError::Unavailable(e)) => {
                report.stop_reason = StopReason::PlatformUnavailable {
                    reason: e.to_string(),
                };
                return Ok(report);
            }
            Err(TokenError::Store(e)) => return Err(e.into()),
        };

        let params = search_params(&user, self.config.max_candidates_per_cycle);
        let page = match self.bounded(self.deps.source.search(&token, &params)).await {
            Ok(page) => page,
            Err(e) => {
                if matches!(e, ExternalError::Unauthorized(_)) {
                    self.deps.tokens.invalidate(user_id);
                }
                warn!(user_id = %user_id, "Vacancy search failed: {e}");
                report.stop_reason = StopReason::PlatformUnavailable {
                    reason: e.to_string(),
                };
                return Ok(report);
            }
        };
        report.fetched = page.items.len();

        let candidates = self.eligible_candidates(&user, page.items).await?;
        report.eligible = candidates.len();
        debug!(
            user_id = %user_id,
            fetched = report.fetched,
            eligible = report.eligible,
            "Candidates selected"
        );

        for candidate in &candidates {
            if cancel.is_cancelled() {
                report.stop_reason = StopReason::Cancelled;
                break;
            }

            let day = user.local_day(self.deps.clock.now());
            self.seed_quota(&user, day, settings.daily_cap).await?;
            if let Reservation::Denied { used, cap } =
                self.deps.quota.reserve(user_id, day, settings.daily_cap)
            {
                info!(user_id = %user_id, used, cap, "Daily quota exhausted");
                report.stop_reason = StopReason::QuotaExhausted;
                break;
            }

            let halt = self
                .process_candidate(&user, &settings, candidate, day, cancel, &mut report)
                .await?;
            match halt {
                None => {}
                Some(Halt::Stop(reason)) => {
                    report.stop_reason = reason;
                    break;
                }
                Some(Halt::AuthorizationExpired(reason)) => {
                    return Err(EngineError::AuthorizationExpired {
                        reason,
                        report: Box::new(report),
                    });
                }
            }
        }

        info!(
            user_id = %user_id,
            attempts = report.attempts,
            succeeded = report.succeeded,
            failed = report.failed,
            stop_reason = ?report.stop_reason,
            "Auto-apply cycle finished"
        );

        if report.attempts > 0 {
            self.send_summary(&user, &settings, &report).await;
        }
        Ok(report)
    }

    /// Restores the day's count from the stored records the first time this
    /// process reserves for `day`, so a restart does not reset the cap.
    async fn seed_quota(&self, user: &User, day: NaiveDate, cap: u32) -> Result<(), StoreError> {
        if self.deps.quota.is_tracked(user.id, day) {
            return Ok(());
        }
        let (from, until) = user.day_bounds(day);
        let used = self
            .deps
            .applications
            .count_submitted_between(user.id, from, until)
            .await?;
        if used > 0 {
            debug!(user_id = %user.id, %day, used, "Quota seeded from stored applications");
        }
        self.deps.quota.seed(user.id, day, used, cap);
        Ok(())
    }

    /// Salary filter, dedup filter, then processing order.
    async fn eligible_candidates(
        &self,
        user: &User,
        items: Vec<VacancyCandidate>,
    ) -> Result<Vec<VacancyCandidate>, StoreError> {
        let floor = user.preferences.salary_from;
        let affordable: Vec<VacancyCandidate> = items
            .into_iter()
            .filter(|c| match (floor, c.salary_ceiling()) {
                (Some(floor), Some(ceiling)) => ceiling >= floor,
                _ => true,
            })
            .collect();

        let mut fresh = self.deps.dedup.filter(user.id, affordable).await?;
        fresh.sort_by(rank_order);
        fresh.truncate(self.config.max_candidates_per_cycle as usize);
        Ok(fresh)
    }

    /// Generate and submit for one candidate whose quota slot is already
    /// reserved. Every path either keeps the slot (submitted or rejected) or
    /// releases it.
    async fn process_candidate(
        &self,
        user: &User,
        settings: &EffectiveSettings,
        candidate: &VacancyCandidate,
        day: NaiveDate,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> Result<Option<Halt>, StoreError> {
        let request =
            CoverLetterRequest::for_candidate(user, candidate, settings.cover_letter_max_length);
        let letter = match self.bounded(self.deps.generator.generate(&request)).await {
            Ok(raw) => finalize_letter(&raw, settings.cover_letter_max_length)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let letter = match letter {
            Ok(letter) => letter,
            Err(reason) => {
                warn!(
                    user_id = %user.id,
                    vacancy_id = %candidate.id,
                    "Cover letter generation failed: {reason}"
                );
                return self
                    .defer(user, candidate, day, format!("generation: {reason}"), None, report)
                    .await;
            }
        };

        if cancel.is_cancelled() {
            self.deps.quota.release(user.id, day);
            return Ok(Some(Halt::Stop(StopReason::Cancelled)));
        }

        // Generation can take long enough for the search token to age out.
        let token = match self.deps.tokens.get_valid_token(user.id).await {
            Ok(token) => token,
            Err(TokenError::AuthorizationExpired { reason, .. }) => {
                self.deps.quota.release(user.id, day);
                return Ok(Some(Halt::AuthorizationExpired(reason)));
            }
            Err(TokenError::Unavailable(e)) => {
                self.deps.quota.release(user.id, day);
                return Ok(Some(Halt::Stop(StopReason::PlatformUnavailable {
                    reason: e.to_string(),
                })));
            }
            Err(TokenError::Store(e)) => {
                self.deps.quota.release(user.id, day);
                return Err(e);
            }
        };
        let submitted = self
            .bounded(self.deps.source.submit(
                &token,
                &candidate.id,
                &user.profile.platform_resume_id,
                &letter,
            ))
            .await;

        match submitted {
            Ok(receipt) => {
                // Mark first: a lost record is recoverable, a second submit is not.
                self.deps.dedup.mark_processed(user.id, &candidate.id).await?;
                let now = self.deps.clock.now();
                self.save_record(ApplicationRecord {
                    id: Uuid::new_v4(),
                    user_id: user.id,
                    vacancy_id: candidate.id.clone(),
                    vacancy_title: candidate.title.clone(),
                    employer: candidate.employer.clone(),
                    state: ApplicationState::Submitted,
                    external_id: Some(receipt.application_id.clone()),
                    submitted_at: Some(now),
                    cover_letter: Some(letter),
                    failure_reason: None,
                    created_at: now,
                })
                .await;
                info!(
                    user_id = %user.id,
                    vacancy_id = %candidate.id,
                    outcome = "submitted",
                    "Application submitted"
                );
                report.record(
                    candidate,
                    Outcome::Submitted {
                        application_id: receipt.application_id,
                    },
                );
                Ok(None)
            }
            Err(ExternalError::Rejected(reason)) => {
                self.deps.dedup.mark_processed(user.id, &candidate.id).await?;
                let attempted_at = self.deps.clock.now();
                self.record_permanent(user, candidate, Some(letter), Some(attempted_at), &reason)
                    .await;
                report.record(candidate, Outcome::FailedPermanent { reason });
                Ok(None)
            }
            Err(ExternalError::Unauthorized(reason)) => {
                self.deps.tokens.invalidate(user.id);
                self.defer(user, candidate, day, format!("unauthorized: {reason}"), None, report)
                    .await
            }
            Err(e) => {
                let retry_after = e.retry_after();
                self.defer(user, candidate, day, e.to_string(), retry_after, report)
                    .await
            }
        }
    }

    /// Releases the slot and counts a failure. Once the count reaches the
    /// bound the vacancy is excluded for good.
    async fn defer(
        &self,
        user: &User,
        candidate: &VacancyCandidate,
        day: NaiveDate,
        reason: String,
        retry_after: Option<Duration>,
        report: &mut CycleReport,
    ) -> Result<Option<Halt>, StoreError> {
        self.deps.quota.release(user.id, day);
        let failures = self.deps.dedup.record_failure(user.id, &candidate.id).await?;

        if failures >= self.config.max_transient_retries {
            let reason = format!("gave up after {failures} failed attempts: {reason}");
            self.deps.dedup.mark_processed(user.id, &candidate.id).await?;
            self.record_permanent(user, candidate, None, None, &reason).await;
            report.record(candidate, Outcome::FailedPermanent { reason });
        } else {
            info!(
                user_id = %user.id,
                vacancy_id = %candidate.id,
                attempt = failures,
                outcome = "deferred",
                "Candidate deferred: {reason}"
            );
            let now = self.deps.clock.now();
            self.save_record(ApplicationRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                vacancy_id: candidate.id.clone(),
                vacancy_title: candidate.title.clone(),
                employer: candidate.employer.clone(),
                state: ApplicationState::FailedRetryable,
                external_id: None,
                submitted_at: None,
                cover_letter: None,
                failure_reason: Some(reason.clone()),
                created_at: now,
            })
            .await;
            report.record(candidate, Outcome::Deferred { reason });
        }

        Ok(retry_after.map(|wait| {
            warn!(
                user_id = %user.id,
                "Platform asked to back off for {}s, ending cycle",
                wait.as_secs()
            );
            Halt::Stop(StopReason::RateLimited)
        }))
    }

    async fn record_permanent(
        &self,
        user: &User,
        candidate: &VacancyCandidate,
        letter: Option<String>,
        submitted_at: Option<DateTime<Utc>>,
        reason: &str,
    ) {
        warn!(
            user_id = %user.id,
            vacancy_id = %candidate.id,
            outcome = "failed_permanent",
            "Candidate excluded: {reason}"
        );
        let now = self.deps.clock.now();
        self.save_record(ApplicationRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            vacancy_id: candidate.id.clone(),
            vacancy_title: candidate.title.clone(),
            employer: candidate.employer.clone(),
            state: ApplicationState::FailedPermanent,
            external_id: None,
            submitted_at,
            cover_letter: letter,
            failure_reason: Some(reason.to_string()),
            created_at: now,
        })
        .await;
    }

    /// Application records are history; losing one must not abort the cycle
    /// after the platform has already accepted a submission.
    async fn save_record(&self, record: ApplicationRecord) {
        if let Err(e) = self.deps.applications.insert(&record).await {
            error!(
                user_id = %record.user_id,
                vacancy_id = %record.vacancy_id,
                "Failed to store application record: {e}"
            );
        }
    }

    async fn send_summary(&self, user: &User, settings: &EffectiveSettings, report: &CycleReport) {
        let Some(chat_id) = user.telegram_chat_id else {
            debug!(user_id = %user.id, "No chat linked, skipping cycle summary");
            return;
        };
        let notification = summary_notification(report, settings, &self.config.platform_web_url);
        if let Err(e) = self.bounded(self.deps.notifier.send(chat_id, &notification)).await {
            warn!(user_id = %user.id, "Failed to send cycle summary: {e}");
        }
    }

    /// Applies the per-call timeout; an elapsed timer counts as transient.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ExternalError>>,
    ) -> Result<T, ExternalError> {
        let limit = self.config.external_call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::Timeout(limit)),
        }
    }
}

fn search_params(user: &User, per_page: u32) -> SearchParams {
    let prefs = &user.preferences;
    SearchParams {
        text: prefs.text.clone(),
        area: prefs.area.clone(),
        salary: prefs.salary_from,
        experience: prefs.experience.clone(),
        employment: prefs.employment.clone(),
        per_page,
    }
}

pub fn summary_notification(
    report: &CycleReport,
    settings: &EffectiveSettings,
    platform_web_url: &str,
) -> Notification {
    let title = format!(
        "Auto-apply: {} of {} applications sent",
        report.succeeded, report.attempts
    );

    let mut lines: Vec<String> = report
        .outcomes
        .iter()
        .map(|o| match &o.outcome {
            Outcome::Submitted { .. } => format!("✅ {} ({})", o.title, o.employer),
            Outcome::Deferred { .. } => format!("⏳ {} ({}): will retry later", o.title, o.employer),
            Outcome::FailedPermanent { .. } => format!("❌ {} ({}): skipped", o.title, o.employer),
        })
        .collect();

    match &report.stop_reason {
        StopReason::QuotaExhausted => lines.push(format!(
            "\nDaily limit of {} applications reached.",
            settings.daily_cap
        )),
        StopReason::RateLimited => {
            lines.push("\nThe platform asked to slow down; the rest waits for the next run.".into())
        }
        StopReason::Cancelled => lines.push("\nAuto-apply was stopped.".into()),
        StopReason::Completed | StopReason::PlatformUnavailable { .. } => {}
    }

    Notification::new(title, lines.join("\n")).with_button(
        "My applications",
        format!("{}/applicant/negotiations", platform_web_url.trim_end_matches('/')),
    )
}
