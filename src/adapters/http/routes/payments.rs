use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, auth::current_user},
    app_error::{AppError, AppResult},
    application::use_cases::{
        reconciliation::ReconciliationEventProfile, subscription_payments::InitializeOutcome,
    },
    domain::entities::{payment_status::PaymentStatus, reconciliation_status::ReconciliationStatus},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/initialize", post(initialize_payment))
        .route("/verify/{reference}", post(verify_payment))
        .route("/reconciliation", get(list_reconciliation_events))
}

/// Accepted either as query parameters or as a JSON body; body fields win.
#[derive(Debug, Default, Deserialize)]
struct InitializeParams {
    tier_id: Option<Uuid>,
    callback_url: Option<String>,
}

/// POST /api/payments/initialize
async fn initialize_payment(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<InitializeParams>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &jar, &app_state)?;

    let body_params: InitializeParams = if body.iter().all(u8::is_ascii_whitespace) {
        InitializeParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid request body: {e}")))?
    };

    let tier_id = body_params
        .tier_id
        .or(query.tier_id)
        .ok_or_else(|| AppError::InvalidInput("tier_id is required".into()))?;
    let callback_url = body_params.callback_url.or(query.callback_url);

    let outcome = app_state
        .subscription_payment_use_cases
        .initialize(&caller, tier_id, callback_url.as_deref())
        .await?;

    let body = match outcome {
        InitializeOutcome::Created {
            authorization_url,
            reference,
        } => json!({ "authorization_url": authorization_url, "reference": reference }),
        InitializeOutcome::AlreadyActive {
            subscription_id,
            tier_id,
        } => json!({
            "status": "already_active",
            "subscription_id": subscription_id,
            "tier_id": tier_id,
        }),
        InitializeOutcome::Pending {
            reference,
            authorization_url,
            note,
        } => {
            let mut body = json!({ "status": "pending", "reference": reference });
            if let Some(url) = authorization_url {
                body["authorization_url"] = json!(url);
            }
            if let Some(note) = note {
                body["note"] = json!(note);
            }
            body
        }
    };
    Ok(Json(body))
}

#[derive(Serialize)]
struct VerifyResponse {
    status: PaymentStatus,
    reference: String,
}

/// POST /api/payments/verify/{reference}
async fn verify_payment(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let caller = current_user(&headers, &jar, &app_state)?;

    let status = app_state
        .subscription_payment_use_cases
        .verify(&reference, &caller)
        .await?;

    Ok(Json(VerifyResponse { status, reference }))
}

#[derive(Debug, Deserialize)]
struct ReconciliationQuery {
    status: Option<ReconciliationStatus>,
    limit: Option<i64>,
}

/// GET /api/payments/reconciliation?status=open
async fn list_reconciliation_events(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ReconciliationQuery>,
) -> AppResult<Json<Vec<ReconciliationEventProfile>>> {
    let caller = current_user(&headers, &jar, &app_state)?;

    let events = app_state
        .reconciliation_use_cases
        .list_events(&caller, query.status, query.limit)
        .await?;

    Ok(Json(events))
}
