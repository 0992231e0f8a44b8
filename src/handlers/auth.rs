//! Login and password endpoints.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::Json};

use super::Body;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::auth::{ChangePassword, LoginRequest, LoginResponse};
use crate::tenancy::Deadline;

/// Exchange an email, phone number or account code plus password for a bearer token
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 423, description = "Account locked after repeated failures", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Body(request): Body<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let deadline = Deadline::after(Duration::from_millis(state.config.request_timeout_ms));
    Ok(Json(state.auth.login(deadline, request).await?))
}

/// Replace the caller's password, clearing any pending one-time password
#[utoipa::path(
    post,
    path = "/auth/password",
    security(("bearer_auth" = [])),
    request_body = ChangePassword,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New password rejected", body = ApiError),
        (status = 401, description = "Current password is wrong", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn change_password(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<ChangePassword>,
) -> Result<StatusCode, ApiError> {
    state.auth.change_password(&ctx, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
