pub mod health;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/telegram/webhook",
            post(webhook::handle_telegram_webhook),
        )
        .with_state(state)
}
