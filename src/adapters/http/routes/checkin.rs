use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    adapters::http::{app_state::AppState, auth::current_user},
    app_error::{AppError, AppResult},
    application::use_cases::checkin::{CheckinProfile, CheckinRequest},
    domain::entities::checkin_status::CheckinStatus,
};

pub fn gym_router() -> Router<AppState> {
    Router::new().route("/{gym_id}/checkin", post(perform_checkin))
}

pub fn history_router() -> Router<AppState> {
    Router::new().route("/me", get(list_my_checkins))
}

#[derive(Debug, Deserialize, Validate)]
struct CheckinPayload {
    #[validate(length(min = 1, message = "qr_nonce must not be empty"))]
    qr_nonce: String,
    #[serde(alias = "face_image")]
    #[validate(length(min = 1, message = "face_image is required"))]
    face_image_base64: String,
    #[validate(range(min = -90.0, max = 90.0, message = "client_lat out of range"))]
    client_lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "client_lng out of range"))]
    client_lng: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CheckinResponse {
    checkin_id: Uuid,
    status: CheckinStatus,
    face_score: Option<f64>,
    rejected_reason: Option<String>,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl From<CheckinProfile> for CheckinResponse {
    fn from(c: CheckinProfile) -> Self {
        Self {
            checkin_id: c.id,
            status: c.status,
            face_score: c.face_score,
            rejected_reason: c.rejected_reason,
            created_at: c.created_at,
            confirmed_at: c.confirmed_at,
        }
    }
}

/// Strips an optional `data:image/...;base64,` prefix and checks the rest decodes.
fn normalize_face_image(raw: &str) -> AppResult<String> {
    let encoded = match raw.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => raw,
    }
    .trim();
    STANDARD
        .decode(encoded)
        .map_err(|_| AppError::InvalidInput("face_image is not valid base64".into()))?;
    Ok(encoded.to_string())
}

/// POST /api/gyms/{gym_id}/checkin
async fn perform_checkin(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(gym_id): Path<Uuid>,
    Json(payload): Json<CheckinPayload>,
) -> AppResult<Json<CheckinResponse>> {
    let caller = current_user(&headers, &jar, &app_state)?;
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let face_image_base64 = normalize_face_image(&payload.face_image_base64)?;

    let checkin = app_state
        .checkin_use_cases
        .perform_checkin(
            &caller,
            CheckinRequest {
                gym_id,
                qr_nonce: payload.qr_nonce,
                face_image_base64,
                client_lat: payload.client_lat,
                client_lng: payload.client_lng,
            },
        )
        .await?;

    Ok(Json(checkin.into()))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

/// GET /api/checkins/me
async fn list_my_checkins(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<CheckinProfile>>> {
    let caller = current_user(&headers, &jar, &app_state)?;
    let checkins = app_state
        .checkin_use_cases
        .list_my_checkins(&caller, query.limit)
        .await?;
    Ok(Json(checkins))
}
