//! Outbound user notifications. Delivery is at-least-once; the chat client
//! shows duplicates as separate messages.

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::ExternalError;

/// A link rendered under the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub buttons: Vec<Button>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_button(mut self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(Button {
            text: text.into(),
            url: url.into(),
        });
        self
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, chat_id: i64, notification: &Notification) -> Result<(), ExternalError>;
}
