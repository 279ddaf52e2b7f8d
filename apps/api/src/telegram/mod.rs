//! Telegram Bot API: inbound update parsing and the outbound message client.

pub mod client;

use serde::Deserialize;
use serde_json::Value;

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: Option<TelegramChat>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// User intent carried by a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Stop,
    Status,
    Unrecognized,
}

impl ChatCommand {
    /// Maps the first word of a message to a command. `/start@my_bot` style
    /// mentions are accepted.
    pub fn from_text(text: &str) -> Self {
        let Some(word) = text.split_whitespace().next() else {
            return ChatCommand::Unrecognized;
        };
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        match name.as_str() {
            "/start" | "/autoapply_on" => ChatCommand::Start,
            "/stop" | "/autoapply_off" => ChatCommand::Stop,
            "/status" => ChatCommand::Status,
            _ => ChatCommand::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub chat_id: i64,
    pub command: ChatCommand,
}

/// Extracts a command from a raw webhook payload. Returns `None` when the
/// payload is not a text message with a chat attached.
pub fn parse_update(payload: &Value) -> Option<InboundCommand> {
    let update: TelegramUpdate = serde_json::from_value(payload.clone()).ok()?;
    let message = update.message?;
    let chat = message.chat?;
    let text = message.text?;
    Some(InboundCommand {
        chat_id: chat.id,
        command: ChatCommand::from_text(&text),
    })
}
