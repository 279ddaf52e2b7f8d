//! Outbound side of the chat bot: `sendMessage` with optional link buttons.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ExternalError;
use crate::notify::{Notification, NotificationDispatcher};
use crate::retry::{parse_retry_after, with_retry, RetryPolicy};
use crate::telegram::TelegramApiResponse;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    api_url: String,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            bot_token,
            api_url: TELEGRAM_API_URL.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn send_once(&self, body: &Value) -> Result<(), ExternalError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let header_retry = parse_retry_after(response.headers());
        let result: TelegramApiResponse<Value> = response.json().await?;
        if result.ok {
            return Ok(());
        }

        let description = result.description.unwrap_or_default();
        let retry_after = result
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs)
            .or(header_retry);

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ExternalError::Transient {
                message: format!("sendMessage failed ({status}): {description}"),
                retry_after,
            });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ExternalError::Unauthorized(description));
        }
        Err(ExternalError::Rejected(format!(
            "sendMessage failed ({status}): {description}"
        )))
    }
}

#[async_trait]
impl NotificationDispatcher for TelegramNotifier {
    async fn send(&self, chat_id: i64, notification: &Notification) -> Result<(), ExternalError> {
        let body = message_body(chat_id, notification);
        with_retry(&self.retry, "telegram send", || self.send_once(&body)).await?;
        debug!(chat_id, title = %notification.title, "Notification sent");
        Ok(())
    }
}

fn message_body(chat_id: i64, notification: &Notification) -> Value {
    let text = format!(
        "<b>{}</b>\n\n{}",
        escape_html(&notification.title),
        escape_html(&notification.body)
    );
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    });
    if !notification.buttons.is_empty() {
        let rows: Vec<Value> = notification
            .buttons
            .iter()
            .map(|b| json!([{ "text": b.text, "url": b.url }]))
            .collect();
        body["reply_markup"] = json!({ "inline_keyboard": rows });
    }
    body
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
