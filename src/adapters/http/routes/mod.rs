pub mod checkin;
pub mod payment_webhooks;
pub mod payments;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest(
            "/payments",
            payments::router().merge(payment_webhooks::router()),
        )
        .nest("/gyms", checkin::gym_router())
        .nest("/checkins", checkin::history_router())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
