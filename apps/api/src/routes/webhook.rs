use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::AppError;
use crate::state::AppState;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// POST /api/v1/telegram/webhook
///
/// Telegram redelivers any update that does not get a 200, so every body that
/// passes the secret check is acknowledged, parseable or not. Commands run on
/// a background task after the response is sent.
pub async fn handle_telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(AppError::Unauthorized);
        }
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            let handler = Arc::clone(&state.webhook);
            tokio::spawn(async move {
                let outcome = handler.handle(&payload).await;
                debug!("Webhook update handled: {outcome:?}");
            });
        }
        Err(e) => debug!("Ignoring non-JSON webhook body: {e}"),
    }

    Ok(Json(json!({ "ok": true })))
}
