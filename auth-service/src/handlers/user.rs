use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{policy::PolicyRequest, ErrorResponse},
    middleware::CurrentUser,
    models::{Permission, UserResponse},
    utils::ValidatedJson,
    AppState,
};

/// List all users
#[utoipa::path(
    get,
    path = "/user/",
    responses(
        (status = 200, description = "Users", body = Vec<UserResponse>),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "User",
    security(("session" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let users = state.user_service.list_users(&principal).await?;
    Ok(Json(
        users.into_iter().map(UserResponse::from).collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/user/{id}/policy",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Policies granted directly to the user", body = Vec<Permission>),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "User",
    security(("session" = []))
)]
pub async fn list_user_policies(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let policies = state.user_service.list_policies(&principal, id).await?;
    Ok(Json(policies))
}

#[utoipa::path(
    post,
    path = "/user/{id}/policy",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = PolicyRequest,
    responses(
        (status = 201, description = "Policy added", body = Permission),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "User",
    security(("session" = []))
)]
pub async fn add_user_policy(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let permission = state.user_service.add_policy(&principal, id, &req).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    delete,
    path = "/user/{id}/policy/{policy_id}",
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("policy_id" = Uuid, Path, description = "Policy id")
    ),
    responses(
        (status = 204, description = "Policy removed"),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "User",
    security(("session" = []))
)]
pub async fn delete_user_policy(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .user_service
        .delete_policy(&principal, id, policy_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
