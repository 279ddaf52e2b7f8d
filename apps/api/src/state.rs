use std::sync::Arc;

use crate::engine::commands::WebhookCommandHandler;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub webhook: Arc<WebhookCommandHandler>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`; `None` disables the check.
    pub webhook_secret: Option<String>,
}
