//! Turns inbound chat-bot updates into scheduler commands and replies.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::engine::quota::QuotaTracker;
use crate::engine::scheduler::{RunState, RunStatus, Scheduler, SchedulerCommand, Transition};
use crate::errors::EngineError;
use crate::models::application::ApplicationState;
use crate::models::user::User;
use crate::notify::{Notification, NotificationDispatcher};
use crate::store::{ApplicationStore, UserStore};
use crate::telegram::{parse_update, ChatCommand};

/// How many recent applications the status reply lists.
const STATUS_RECENT_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Malformed payload or unrecognised text. Nothing changed, nothing sent.
    Ignored,
    NotLinked { chat_id: i64 },
    Handled { command: ChatCommand, transition: Transition },
    /// The command was understood but could not be applied.
    Failed { command: ChatCommand },
}

pub struct WebhookCommandHandler {
    scheduler: Arc<Scheduler>,
    users: Arc<dyn UserStore>,
    applications: Arc<dyn ApplicationStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    quota: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
}

impl WebhookCommandHandler {
    pub fn new(
        scheduler: Arc<Scheduler>,
        users: Arc<dyn UserStore>,
        applications: Arc<dyn ApplicationStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        quota: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            users,
            applications,
            notifier,
            quota,
            clock,
        }
    }

    pub async fn handle(&self, payload: &Value) -> WebhookOutcome {
        let Some(inbound) = parse_update(payload) else {
            debug!("Ignoring webhook payload without a text message");
            return WebhookOutcome::Ignored;
        };
        if inbound.command == ChatCommand::Unrecognized {
            return WebhookOutcome::Ignored;
        }
        let chat_id = inbound.chat_id;

        let user = match self.users.find_by_chat_id(chat_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!(chat_id, "Command from unlinked chat");
                self.reply(
                    chat_id,
                    Notification::new(
                        "Account not linked",
                        "This chat is not connected to an account yet. Link it in the app first.",
                    ),
                )
                .await;
                return WebhookOutcome::NotLinked { chat_id };
            }
            Err(e) => {
                error!(chat_id, "Failed to look up chat: {e}");
                return WebhookOutcome::Failed {
                    command: inbound.command,
                };
            }
        };

        let command = match inbound.command {
            ChatCommand::Start => SchedulerCommand::Start(user.id),
            ChatCommand::Stop => SchedulerCommand::Stop(user.id),
            ChatCommand::Status => SchedulerCommand::Status(user.id),
            ChatCommand::Unrecognized => return WebhookOutcome::Ignored,
        };

        match self.scheduler.apply(command).await {
            Ok(transition) => {
                let reply = self.confirmation(&user, &transition).await;
                self.reply(chat_id, reply).await;
                WebhookOutcome::Handled {
                    command: inbound.command,
                    transition,
                }
            }
            Err(e) => {
                error!(user_id = %user.id, "Failed to apply {:?}: {e}", inbound.command);
                self.reply(chat_id, failure_reply(&e)).await;
                WebhookOutcome::Failed {
                    command: inbound.command,
                }
            }
        }
    }

    async fn confirmation(&self, user: &User, transition: &Transition) -> Notification {
        match transition {
            Transition::Started { next_fire_at } => {
                let when = next_fire_at
                    .map(|at| format!(" First run at {} UTC.", at.format("%H:%M")))
                    .unwrap_or_default();
                Notification::new("Auto-apply is on", format!("I will apply to new vacancies for you.{when}"))
            }
            Transition::AlreadyRunning => {
                Notification::new("Auto-apply is on", "Auto-apply was already running.")
            }
            Transition::Stopped => Notification::new(
                "Auto-apply is off",
                "No new applications will be sent. Send /start to resume.",
            ),
            Transition::AlreadyStopped => {
                Notification::new("Auto-apply is off", "Auto-apply was not running.")
            }
            Transition::Status(status) => self.status_reply(user, status).await,
        }
    }

    async fn status_reply(&self, user: &User, status: &RunStatus) -> Notification {
        let settings = user.settings(&self.scheduler.defaults());
        let day = user.local_day(self.clock.now());
        let used = match self.quota.usage(user.id, day) {
            Some(quota) => quota.count,
            None => {
                let (from, until) = user.day_bounds(day);
                self.applications
                    .count_submitted_between(user.id, from, until)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(user_id = %user.id, "Failed to count today's applications: {e}");
                        0
                    })
            }
        };

        let mut lines = vec![
            match status.state {
                RunState::Running => "State: running".to_string(),
                RunState::Stopped => "State: stopped".to_string(),
            },
            format!("Applications today: {used} of {}", settings.daily_cap),
        ];
        if let Some(at) = status.next_fire_at {
            lines.push(format!("Next run: {} UTC", at.format("%Y-%m-%d %H:%M")));
        }
        if status.cycle_in_flight {
            lines.push("A run is in progress right now.".to_string());
        }

        match self.applications.list_for_user(user.id).await {
            Ok(records) => {
                let recent: Vec<String> = records
                    .iter()
                    .filter(|r| r.state == ApplicationState::Submitted)
                    .take(STATUS_RECENT_LIMIT)
                    .map(|r| format!("• {} ({})", r.vacancy_title, r.employer))
                    .collect();
                if !recent.is_empty() {
                    lines.push(String::new());
                    lines.push("Recent applications:".to_string());
                    lines.extend(recent);
                }
            }
            Err(e) => warn!(user_id = %user.id, "Failed to load applications for status: {e}"),
        }

        Notification::new("Auto-apply status", lines.join("\n"))
    }

    async fn reply(&self, chat_id: i64, notification: Notification) {
        if let Err(e) = self.notifier.send(chat_id, &notification).await {
            warn!(chat_id, "Failed to send reply: {e}");
        }
    }
}

fn failure_reply(error: &EngineError) -> Notification {
    let body = match error {
        EngineError::UserNotFound(_) => "Your account could not be found.",
        _ => "Something went wrong. Please try again in a minute.",
    };
    Notification::new("Command failed", body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::Harness;

    fn message(chat_id: i64, text: &str) -> Value {
        json!({
            "update_id": 1,
            "message": {"message_id": 1, "chat": {"id": chat_id, "type": "private"}, "text": text}
        })
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acknowledged_without_effects() {
        let h = Harness::new();
        let user = h.add_user(5);
        let handler = h.webhook_handler();

        let missing_chat = json!({"update_id": 1, "message": {"message_id": 1, "text": "/start"}});
        assert_eq!(handler.handle(&missing_chat).await, WebhookOutcome::Ignored);

        assert!(h.notifier.sent().is_empty());
        assert!(!h.users.auto_apply_flag(user.id));
    }

    #[tokio::test]
    async fn test_start_twice_confirms_both_times() {
        let h = Harness::new();
        let user = h.add_user(5);
        let chat_id = user.telegram_chat_id.unwrap();
        let handler = h.webhook_handler();

        let first = handler.handle(&message(chat_id, "/start")).await;
        assert!(matches!(
            first,
            WebhookOutcome::Handled {
                transition: Transition::Started { .. },
                ..
            }
        ));
        let second = handler.handle(&message(chat_id, "/start")).await;
        assert_eq!(
            second,
            WebhookOutcome::Handled {
                command: ChatCommand::Start,
                transition: Transition::AlreadyRunning
            }
        );
        assert_eq!(h.notifier.sent().len(), 2);
        assert!(h.users.auto_apply_flag(user.id));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_still_confirms() {
        let h = Harness::new();
        let user = h.add_user(5);
        let handler = h.webhook_handler();

        let outcome = handler
            .handle(&message(user.telegram_chat_id.unwrap(), "/stop"))
            .await;
        assert_eq!(
            outcome,
            WebhookOutcome::Handled {
                command: ChatCommand::Stop,
                transition: Transition::AlreadyStopped
            }
        );
        assert_eq!(h.notifier.sent()[0].1.title, "Auto-apply is off");
    }

    #[tokio::test]
    async fn test_unlinked_chat_gets_reply_and_no_mutation() {
        let h = Harness::new();
        let handler = h.webhook_handler();

        let outcome = handler.handle(&message(999_999, "/start")).await;
        assert_eq!(outcome, WebhookOutcome::NotLinked { chat_id: 999_999 });
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 999_999);
    }

    #[tokio::test]
    async fn test_unrecognised_text_is_ignored() {
        let h = Harness::new();
        let user = h.add_user(5);
        let handler = h.webhook_handler();

        let outcome = handler
            .handle(&message(user.telegram_chat_id.unwrap(), "hello there"))
            .await;
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_quota_usage() {
        let h = Harness::new();
        let user = h.add_user(7);
        h.quota.reserve(user.id, h.today(), 7);
        let handler = h.webhook_handler();

        handler
            .handle(&message(user.telegram_chat_id.unwrap(), "/status"))
            .await;
        let sent = h.notifier.sent();
        assert!(sent[0].1.body.contains("State: stopped"));
        assert!(sent[0].1.body.contains("Applications today: 1 of 7"));
    }
}
