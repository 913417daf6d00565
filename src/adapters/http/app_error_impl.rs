use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before it gets converted into a status response.
        tracing::error!(error = ?self, "Request failed");

        match self {
            AppError::Database(_) => {
                error_resp(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DatabaseError, None)
            }
            AppError::InvalidCredentials => {
                error_resp(StatusCode::UNAUTHORIZED, ErrorCode::InvalidCredentials, None)
            }
            AppError::Forbidden(msg) => {
                error_resp(StatusCode::FORBIDDEN, ErrorCode::Forbidden, Some(msg))
            }
            AppError::NotFound(msg) => {
                error_resp(StatusCode::NOT_FOUND, ErrorCode::NotFound, Some(msg))
            }
            AppError::InvalidInput(msg) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, Some(msg))
            }
            AppError::PaymentRejected(msg) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::PaymentRejected, Some(msg))
            }
            AppError::ActivationConflict => error_resp(
                StatusCode::BAD_REQUEST,
                ErrorCode::ActivationConflict,
                Some("Subscription activation conflict".into()),
            ),
            AppError::InvalidSignature => error_resp(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidSignature,
                Some("Invalid signature".into()),
            ),
            AppError::Conflict(_) => error_resp(StatusCode::CONFLICT, ErrorCode::Conflict, None),
            AppError::ProviderInitFailed { reference } => {
                let body = serde_json::json!({
                    "code": ErrorCode::ProviderInitFailed.as_str(),
                    "message": "Payment provider initialization failed",
                    "reference": reference,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
            AppError::Upstream(_) => {
                error_resp(StatusCode::BAD_GATEWAY, ErrorCode::UpstreamError, None)
            }
            AppError::Internal(_) => {
                error_resp(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, None)
            }
        }
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: Option<String>) -> Response {
    let body = match message {
        Some(msg) => serde_json::json!({ "code": code.as_str(), "message": msg }),
        None => serde_json::json!({ "code": code.as_str() }),
    };
    (status, Json(body)).into_response()
}
