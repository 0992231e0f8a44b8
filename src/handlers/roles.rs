//! Role endpoints, super-administrators only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
};

use super::{Body, created};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::models::Role;
use crate::server::AppState;
use crate::services::roles::{NewRole, RolePatch};

read_handlers!(
    Role,
    tag = "roles",
    list = "/roles",
    item = "/roles/{code}",
    get_role,
    list_roles,
);

#[utoipa::path(
    post,
    path = "/roles",
    security(("bearer_auth" = [])),
    request_body = NewRole,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Invalid name or privileges", body = ApiError),
        (status = 403, description = "Caller is not a super-administrator", body = ApiError),
        (status = 409, description = "Role name already exists", body = ApiError)
    ),
    tag = "roles"
)]
pub async fn create_role(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewRole>,
) -> Result<Response, ApiError> {
    let role = state.roles.create(&ctx, request).await?;
    Ok(created("/roles", role))
}

#[utoipa::path(
    patch,
    path = "/roles/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Role code")),
    request_body = RolePatch,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 403, description = "Caller did not create this role", body = ApiError)
    ),
    tag = "roles"
)]
pub async fn update_role(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<RolePatch>,
) -> Result<Json<Role>, ApiError> {
    Ok(Json(state.roles.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/roles/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Role code")),
    responses(
        (status = 204, description = "Role removed"),
        (status = 403, description = "Caller did not create this role", body = ApiError)
    ),
    tag = "roles"
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_owned::<Role>(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}
