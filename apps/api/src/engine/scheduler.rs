//! Per-user auto-apply timers.
//!
//! Each user with auto-apply on owns one entry in the run arena: a state, a
//! cancellation token, and an in-flight flag. A timer task per entry fires
//! cycles onto a bounded worker pool. At most one cycle per user runs at a
//! time; a tick that lands while the previous cycle is still going is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{AutoApplyDefaults, EngineConfig};
use crate::engine::pipeline::ApplicationPipeline;
use crate::errors::EngineError;
use crate::models::user::UserId;
use crate::notify::{Notification, NotificationDispatcher};
use crate::store::UserStore;

/// How long shutdown waits for running cycles to reach a checkpoint.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    Start(UserId),
    Stop(UserId),
    Status(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub cycle_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Started { next_fire_at: Option<DateTime<Utc>> },
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Status(RunStatus),
}

#[derive(Debug)]
pub enum FireOutcome {
    Started(JoinHandle<()>),
    /// The previous cycle for this user has not finished; this tick is dropped.
    InFlight,
    NotRunning,
}

struct SchedulerRun {
    state: RunState,
    next_fire_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    /// Shared across start/stop so a restarted run cannot overlap a cycle
    /// left over from the previous one.
    in_flight: Arc<AtomicBool>,
}

impl SchedulerRun {
    fn stopped() -> Self {
        Self {
            state: RunState::Stopped,
            next_fire_at: None,
            cancel: CancellationToken::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn status(&self) -> RunStatus {
        RunStatus {
            state: self.state,
            next_fire_at: self.next_fire_at,
            cycle_in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Clears the in-flight flag when the cycle task ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    runs: DashMap<UserId, SchedulerRun>,
    pipeline: Arc<ApplicationPipeline>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    workers: Arc<Semaphore>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<ApplicationPipeline>,
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let pool = config.worker_pool_size.max(1);
        Arc::new(Self {
            runs: DashMap::new(),
            pipeline,
            users,
            notifier,
            clock,
            workers: Arc::new(Semaphore::new(pool)),
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Applies a user command. Start and stop are idempotent and persist the
    /// user's auto-apply flag.
    pub async fn apply(self: &Arc<Self>, command: SchedulerCommand) -> Result<Transition, EngineError> {
        match command {
            SchedulerCommand::Start(user_id) => {
                let user = self
                    .users
                    .get_user(user_id)
                    .await?
                    .ok_or(EngineError::UserNotFound(user_id))?;
                self.users.set_auto_apply(user_id, true).await?;
                let interval = user.settings(&self.config.defaults).interval;
                Ok(self.start_run(user_id, interval))
            }
            SchedulerCommand::Stop(user_id) => {
                // Cancel first: a failed flag write must not leave the run going.
                let was_running = self.stop_run(user_id);
                if let Err(e) = self.users.set_auto_apply(user_id, false).await {
                    error!(user_id = %user_id, "Run stopped but the flag was not saved: {e}");
                }
                if was_running {
                    Ok(Transition::Stopped)
                } else {
                    Ok(Transition::AlreadyStopped)
                }
            }
            SchedulerCommand::Status(user_id) => Ok(Transition::Status(self.status(user_id))),
        }
    }

    pub fn defaults(&self) -> AutoApplyDefaults {
        self.config.defaults
    }

    pub fn status(&self, user_id: UserId) -> RunStatus {
        self.runs
            .get(&user_id)
            .map(|run| run.status())
            .unwrap_or(RunStatus {
                state: RunState::Stopped,
                next_fire_at: None,
                cycle_in_flight: false,
            })
    }

    /// Re-creates runs for every user whose stored flag is on.
    pub async fn resume_enabled(self: &Arc<Self>) -> Result<usize, EngineError> {
        let ids = self
            .users
            .list_auto_apply_users(self.config.defaults.auto_apply_enabled)
            .await?;
        let mut resumed = 0;
        for user_id in ids {
            let Some(user) = self.users.get_user(user_id).await? else {
                continue;
            };
            let interval = user.settings(&self.config.defaults).interval;
            if matches!(self.start_run(user_id, interval), Transition::Started { .. }) {
                resumed += 1;
            }
        }
        info!("Resumed auto-apply for {resumed} users");
        Ok(resumed)
    }

    /// Cancels every run and waits (bounded) for running cycles to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let permits = u32::try_from(self.config.worker_pool_size.max(1)).unwrap_or(u32::MAX);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.workers.acquire_many(permits)).await {
            Ok(_) => info!("Scheduler drained"),
            Err(_) => warn!("Scheduler shutdown timed out with cycles still running"),
        }
    }

    fn start_run(self: &Arc<Self>, user_id: UserId, interval: Duration) -> Transition {
        let mut run = self
            .runs
            .entry(user_id)
            .or_insert_with(SchedulerRun::stopped);
        if run.state == RunState::Running {
            return Transition::AlreadyRunning;
        }

        let cancel = self.shutdown.child_token();
        run.state = RunState::Running;
        run.cancel = cancel.clone();
        run.next_fire_at = self.next_fire_after(interval);
        self.spawn_timer(user_id, interval, cancel);

        info!(user_id = %user_id, interval_secs = interval.as_secs(), "Auto-apply started");
        Transition::Started {
            next_fire_at: run.next_fire_at,
        }
    }

    /// Returns true if the run was `Running` and is now `Stopped`.
    fn stop_run(&self, user_id: UserId) -> bool {
        let Some(mut run) = self.runs.get_mut(&user_id) else {
            return false;
        };
        if run.state == RunState::Stopped {
            return false;
        }
        run.state = RunState::Stopped;
        run.next_fire_at = None;
        run.cancel.cancel();
        info!(user_id = %user_id, "Auto-apply stopped");
        true
    }

    fn next_fire_after(&self, interval: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(interval)
            .ok()
            .map(|step| self.clock.now() + step)
    }

    fn spawn_timer(self: &Arc<Self>, user_id: UserId, interval: Duration, cancel: CancellationToken) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let FireOutcome::NotRunning = scheduler.fire(user_id) {
                            break;
                        }
                        if let Some(mut run) = scheduler.runs.get_mut(&user_id) {
                            run.next_fire_at = scheduler.next_fire_after(interval);
                        }
                    }
                }
            }
            debug!(user_id = %user_id, "Timer exited");
        });
    }

    /// Starts a cycle for `user_id` unless one is already in flight.
    pub fn fire(self: &Arc<Self>, user_id: UserId) -> FireOutcome {
        let (cancel, in_flight) = match self.runs.get(&user_id) {
            Some(run) if run.state == RunState::Running => {
                (run.cancel.clone(), Arc::clone(&run.in_flight))
            }
            _ => return FireOutcome::NotRunning,
        };

        if in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(user_id = %user_id, "Previous cycle still running, skipping tick");
            return FireOutcome::InFlight;
        }
        let guard = InFlightGuard(in_flight);

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = Arc::clone(&scheduler.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            scheduler.execute(user_id, &cancel).await;
        });
        FireOutcome::Started(handle)
    }

    async fn execute(&self, user_id: UserId, cancel: &CancellationToken) {
        match self.pipeline.run_cycle(user_id, cancel).await {
            Ok(report) => debug!(
                user_id = %user_id,
                attempts = report.attempts,
                "Cycle report recorded"
            ),
            Err(EngineError::AuthorizationExpired { reason, report }) => {
                warn!(
                    user_id = %user_id,
                    attempts = report.attempts,
                    "Authorization expired, stopping auto-apply: {reason}"
                );
                self.on_authorization_expired(user_id).await;
            }
            Err(EngineError::UserNotFound(_)) => {
                warn!(user_id = %user_id, "User no longer exists, dropping run");
                self.stop_run(user_id);
                self.runs.remove(&user_id);
            }
            Err(e) => error!(user_id = %user_id, "Auto-apply cycle failed: {e}"),
        }
    }

    async fn on_authorization_expired(&self, user_id: UserId) {
        if !self.stop_run(user_id) {
            return;
        }
        if let Err(e) = self.users.set_auto_apply(user_id, false).await {
            error!(user_id = %user_id, "Failed to persist auto-apply flag: {e}");
        }

        let chat_id = match self.users.get_user(user_id).await {
            Ok(Some(user)) => user.telegram_chat_id,
            Ok(None) => None,
            Err(e) => {
                error!(user_id = %user_id, "Failed to load user for notification: {e}");
                None
            }
        };
        let Some(chat_id) = chat_id else {
            return;
        };

        let notification = Notification::new(
            "Auto-apply paused",
            "Your job platform authorization has expired. Sign in again, then send /start to resume.",
        )
        .with_button("Sign in", self.config.platform_web_url.clone());
        if let Err(e) = self.notifier.send(chat_id, &notification).await {
            warn!(user_id = %user_id, "Failed to send authorization notice: {e}");
        }
    }
}
