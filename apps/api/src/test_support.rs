//! In-memory stores and scripted service doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::commands::WebhookCommandHandler;
use crate::engine::dedup::Deduplicator;
use crate::engine::pipeline::{ApplicationPipeline, PipelineDeps};
use crate::engine::quota::QuotaTracker;
use crate::engine::scheduler::Scheduler;
use crate::engine::token::TokenManager;
use crate::errors::{ExternalError, StoreError};
use crate::generation::cover_letter::CoverLetterRequest;
use crate::generation::generator::ContentGenerator;
use crate::kv::MemoryKv;
use crate::models::application::{ApplicationRecord, ApplicationState};
use crate::models::credential::{AccessToken, OAuthCredential, RefreshToken, TokenGrant};
use crate::models::user::{ApplicantProfile, SearchPreferences, User, UserId};
use crate::models::vacancy::{SearchPage, SearchParams, SubmitReceipt, VacancyCandidate};
use crate::notify::{Notification, NotificationDispatcher};
use crate::platform::{OAuthProvider, VacancySource};
use crate::store::{ApplicationStore, CredentialStore, UserStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

// ────────────────────────────────────────────────────────────────────────────
// Stores
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<UserId, User>>,
    fail_writes: AtomicBool,
}

impl MemoryUserStore {
    pub fn insert(&self, user: User) {
        lock(&self.users).insert(user.id, user);
    }

    /// Makes every later `set_auto_apply` fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn auto_apply_flag(&self, id: UserId) -> bool {
        lock(&self.users).get(&id).is_some_and(|u| u.auto_apply_enabled == Some(true))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users).get(&id).cloned())
    }

    async fn find_by_chat_id(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users)
            .values()
            .find(|u| u.telegram_chat_id == Some(chat_id))
            .cloned())
    }

    async fn list_auto_apply_users(
        &self,
        enabled_by_default: bool,
    ) -> Result<Vec<UserId>, StoreError> {
        Ok(lock(&self.users)
            .values()
            .filter(|u| u.auto_apply_enabled.unwrap_or(enabled_by_default))
            .map(|u| u.id)
            .collect())
    }

    async fn set_auto_apply(&self, id: UserId, enabled: bool) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("user store is read-only".into()));
        }
        if let Some(user) = lock(&self.users).get_mut(&id) {
            user.auto_apply_enabled = Some(enabled);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<HashMap<UserId, OAuthCredential>>,
}

impl MemoryCredentialStore {
    pub fn put(&self, credential: OAuthCredential) {
        lock(&self.credentials).insert(credential.user_id, credential);
    }

    pub fn get(&self, user_id: UserId) -> Option<OAuthCredential> {
        lock(&self.credentials).get(&user_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, user_id: UserId) -> Result<Option<OAuthCredential>, StoreError> {
        Ok(self.get(user_id))
    }

    async fn save(&self, credential: &OAuthCredential) -> Result<(), StoreError> {
        self.put(credential.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryApplicationStore {
    records: Mutex<Vec<ApplicationRecord>>,
}

impl MemoryApplicationStore {
    /// States in insertion order.
    pub fn states_for(&self, user_id: UserId) -> Vec<ApplicationState> {
        lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.state)
            .collect()
    }
}

#[async_trait]
impl ApplicationStore for MemoryApplicationStore {
    async fn insert(&self, record: &ApplicationRecord) -> Result<(), StoreError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn terminal_vacancy_ids(&self, user_id: UserId) -> Result<HashSet<String>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id && r.state.is_final())
            .map(|r| r.vacancy_id.clone())
            .collect())
    }

    async fn count_submitted_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count = lock(&self.records)
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| r.submitted_at.is_some_and(|at| at >= from && at < until))
            .count();
        Ok(count as u32)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// External service doubles
// ────────────────────────────────────────────────────────────────────────────

/// Search returns a fixed candidate list. Submit succeeds unless a result
/// was scripted for the vacancy. Either call can be held on a gate.
#[derive(Default)]
pub struct FakeVacancySource {
    candidates: Mutex<Vec<VacancyCandidate>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<SubmitReceipt, ExternalError>>>>,
    submitted: Mutex<Vec<String>>,
    search_calls: AtomicUsize,
    search_gate: Mutex<Option<Arc<Semaphore>>>,
    submit_gate: Mutex<Option<Arc<Semaphore>>>,
    submit_entered: Notify,
}

impl FakeVacancySource {
    pub fn set_candidates(&self, candidates: Vec<VacancyCandidate>) {
        *lock(&self.candidates) = candidates;
    }

    pub fn script_submit(&self, vacancy_id: &str, results: Vec<Result<SubmitReceipt, ExternalError>>) {
        lock(&self.scripts).insert(vacancy_id.to_string(), results.into());
    }

    /// Holds every search until permits are added to the returned gate.
    pub fn block_searches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.search_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Holds every submit (after it is counted) until permits are added.
    pub fn block_submits(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.submit_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub async fn wait_for_submit(&self) {
        self.submit_entered.notified().await;
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Vacancy IDs of every submit call, in call order.
    pub fn submitted_ids(&self) -> Vec<String> {
        lock(&self.submitted).clone()
    }
}

async fn pass_gate(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        let _permit = gate.acquire().await.unwrap();
    }
}

#[async_trait]
impl VacancySource for FakeVacancySource {
    async fn search(
        &self,
        _token: &AccessToken,
        _params: &SearchParams,
    ) -> Result<SearchPage, ExternalError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.search_gate).clone();
        pass_gate(gate).await;

        let items = lock(&self.candidates).clone();
        Ok(SearchPage {
            found: items.len() as u64,
            pages: 1,
            items,
        })
    }

    async fn submit(
        &self,
        _token: &AccessToken,
        vacancy_id: &str,
        _resume_id: &str,
        _cover_letter: &str,
    ) -> Result<SubmitReceipt, ExternalError> {
        lock(&self.submitted).push(vacancy_id.to_string());
        self.submit_entered.notify_one();
        let gate = lock(&self.submit_gate).clone();
        pass_gate(gate).await;

        let scripted = lock(&self.scripts)
            .get_mut(vacancy_id)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(SubmitReceipt {
                application_id: format!("app-{vacancy_id}"),
                state: "response".to_string(),
            })
        })
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    failing_titles: Mutex<HashSet<String>>,
}

impl FakeGenerator {
    pub fn fail_for(&self, vacancy_title: &str) {
        lock(&self.failing_titles).insert(vacancy_title.to_string());
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(&self, request: &CoverLetterRequest) -> Result<String, ExternalError> {
        if lock(&self.failing_titles).contains(&request.vacancy_title) {
            return Err(ExternalError::transient("generation service unavailable"));
        }
        Ok(format!(
            "Hello {}! I would be glad to join as {} and bring my experience.",
            request.company_name, request.vacancy_title
        ))
    }
}

/// Grants `fresh-N` / `refresh-next-N` valid for an hour, or fails with the
/// configured error.
#[derive(Default)]
pub struct FakeOAuth {
    calls: AtomicUsize,
    failure: Mutex<Option<ExternalError>>,
}

impl FakeOAuth {
    pub fn fail_with(&self, error: ExternalError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for FakeOAuth {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, ExternalError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        Ok(TokenGrant {
            access_token: AccessToken::new(format!("fresh-{n}")),
            refresh_token: RefreshToken::new(format!("refresh-next-{n}")),
            expires_in_secs: 3600,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, Notification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i64, Notification)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send(&self, chat_id: i64, notification: &Notification) -> Result<(), ExternalError> {
        lock(&self.sent).push((chat_id, notification.clone()));
        Ok(())
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

/// Every engine component wired to in-memory doubles.
pub struct Harness {
    pub users: Arc<MemoryUserStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub applications: Arc<MemoryApplicationStore>,
    pub source: Arc<FakeVacancySource>,
    pub generator: Arc<FakeGenerator>,
    pub notifier: Arc<RecordingNotifier>,
    pub oauth: Arc<FakeOAuth>,
    pub clock: Arc<FixedClock>,
    pub quota: Arc<QuotaTracker>,
    pub dedup: Arc<Deduplicator>,
    pub tokens: Arc<TokenManager>,
    pub config: EngineConfig,
    next_chat_id: AtomicI64,
}

impl Harness {
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        ));
        let credentials = Arc::new(MemoryCredentialStore::default());
        let oauth = Arc::new(FakeOAuth::default());
        let applications = Arc::new(MemoryApplicationStore::default());
        let dedup = Arc::new(Deduplicator::new(
            Arc::new(MemoryKv::new()),
            applications.clone(),
            config.dedup_ttl,
        ));
        let tokens = Arc::new(TokenManager::new(
            credentials.clone(),
            oauth.clone(),
            clock.clone(),
            config.token_safety_margin,
            config.external_call_timeout,
        ));
        Self {
            users: Arc::new(MemoryUserStore::default()),
            credentials,
            applications,
            source: Arc::new(FakeVacancySource::default()),
            generator: Arc::new(FakeGenerator::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            oauth,
            clock,
            quota: Arc::new(QuotaTracker::new()),
            dedup,
            tokens,
            config,
            next_chat_id: AtomicI64::new(1000),
        }
    }

    pub fn add_user(&self, daily_cap: u32) -> User {
        self.add_user_with(daily_cap, |_| {})
    }

    /// Adds a linked user with a credential valid for a day.
    pub fn add_user_with(&self, daily_cap: u32, customize: impl FnOnce(&mut User)) -> User {
        let mut user = User {
            id: Uuid::new_v4(),
            telegram_chat_id: Some(self.next_chat_id.fetch_add(1, Ordering::SeqCst)),
            utc_offset_minutes: 0,
            auto_apply_enabled: None,
            preferences: SearchPreferences {
                text: "rust developer".into(),
                ..SearchPreferences::default()
            },
            profile: ApplicantProfile {
                platform_resume_id: "resume-1".into(),
                experience_summary: "Five years of backend work".into(),
                skills: vec!["Rust".into(), "PostgreSQL".into()],
                additional_info: None,
            },
            max_applications_per_day: Some(daily_cap),
            cover_letter_max_length: None,
            auto_apply_interval_minutes: None,
        };
        customize(&mut user);

        self.credentials.put(OAuthCredential {
            user_id: user.id,
            access_token: AccessToken::new("initial"),
            refresh_token: RefreshToken::new("refresh-0"),
            expires_at: self.clock.now() + chrono::Duration::days(1),
        });
        self.users.insert(user.clone());
        user
    }

    /// Drops everything a process restart loses: quota slots, the in-memory
    /// key-value store, and cached tokens. The stores survive.
    pub fn restart(&mut self) {
        self.quota = Arc::new(QuotaTracker::new());
        self.dedup = Arc::new(Deduplicator::new(
            Arc::new(MemoryKv::new()),
            self.applications.clone(),
            self.config.dedup_ttl,
        ));
        self.tokens = Arc::new(TokenManager::new(
            self.credentials.clone(),
            self.oauth.clone(),
            self.clock.clone(),
            self.config.token_safety_margin,
            self.config.external_call_timeout,
        ));
    }

    pub fn expire_credential(&self, user_id: UserId) {
        if let Some(mut credential) = self.credentials.get(user_id) {
            credential.expires_at = self.clock.now() - chrono::Duration::hours(1);
            self.credentials.put(credential);
        }
    }

    /// A candidate titled "Rust developer {id}" posted `hours_ago` hours ago.
    pub fn candidate(&self, id: &str, hours_ago: i64) -> VacancyCandidate {
        VacancyCandidate {
            id: id.to_string(),
            title: format!("Rust developer {id}"),
            employer: "Ferris Corp".to_string(),
            salary_from: None,
            salary_to: None,
            posted_at: self.clock.now() - chrono::Duration::hours(hours_ago),
            requirement: Some("Async Rust".to_string()),
            responsibility: None,
        }
    }

    /// Today for a UTC user.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            users: self.users.clone(),
            applications: self.applications.clone(),
            source: self.source.clone(),
            generator: self.generator.clone(),
            notifier: self.notifier.clone(),
            tokens: self.tokens.clone(),
            quota: self.quota.clone(),
            dedup: self.dedup.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn pipeline(&self) -> Arc<ApplicationPipeline> {
        Arc::new(ApplicationPipeline::new(self.deps(), self.config.clone()))
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Scheduler::new(
            self.pipeline(),
            self.users.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    pub fn webhook_handler(&self) -> WebhookCommandHandler {
        WebhookCommandHandler::new(
            self.scheduler(),
            self.users.clone(),
            self.applications.clone(),
            self.notifier.clone(),
            self.quota.clone(),
            self.clock.clone(),
        )
    }
}
