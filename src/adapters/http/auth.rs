use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::jwt::{self, Caller},
};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Resolves the caller from `Authorization: Bearer`, falling back to the `access_token` cookie.
pub fn current_user(headers: &HeaderMap, jar: &CookieJar, app_state: &AppState) -> AppResult<Caller> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let token = match bearer {
        Some(token) => token.to_string(),
        None => jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AppError::InvalidCredentials)?,
    };

    let claims = jwt::verify(&token, &app_state.config.jwt_secret)?;
    Caller::try_from(claims)
}
