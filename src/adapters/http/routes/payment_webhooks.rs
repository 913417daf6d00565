//! Payment provider webhook receiver.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{adapters::http::app_state::AppState, app_error::AppError};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// Determines if a webhook processing error should trigger a provider retry.
///
/// Returns `true` for transient failures, answered with 5xx so the provider
/// redelivers. Returns `false` for conditions a redelivery cannot change.
fn is_retryable_error(error: &AppError) -> bool {
    match error {
        // Transient errors - retry may succeed
        AppError::Database(_) => true,
        AppError::Internal(_) => true,
        AppError::Upstream(_) => true,
        AppError::Conflict(_) => true,
        AppError::ActivationConflict => true,

        // Expected conditions - won't change with retry
        AppError::InvalidSignature => false,
        AppError::InvalidInput(_) => false,
        AppError::InvalidCredentials => false,
        AppError::Forbidden(_) => false,
        AppError::NotFound(_) => false,
        AppError::PaymentRejected(_) => false,
        AppError::ProviderInitFailed { .. } => false,

        // Unknown/new variants - safer to retry
        #[allow(unreachable_patterns)]
        _ => true,
    }
}

/// POST /api/payments/webhook
///
/// Unauthenticated; trust comes from the HMAC signature over the raw body.
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match app_state
        .subscription_payment_use_cases
        .ingest_webhook(&body, signature)
        .await
    {
        Ok(ack) => {
            info!(ack = ?ack, "Webhook processed");
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(e @ (AppError::InvalidSignature | AppError::InvalidInput(_))) => {
            warn!(error = %e, "Rejected webhook delivery");
            e.into_response()
        }
        Err(e) if is_retryable_error(&e) => {
            error!(
                error = %e,
                retryable = true,
                "Webhook processing failed, returning 500 for provider retry"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!(error = %e, retryable = false, "Webhook not applied");
            (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": e.to_string() })),
            )
                .into_response()
        }
    }
}
