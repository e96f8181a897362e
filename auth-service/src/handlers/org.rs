use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;
use uuid::Uuid;

use super::{failure, redirect_with};
use crate::{
    dtos::{
        auth::{EmailRequest, InviteResponse, LinkQuery},
        org::{AcceptInviteRequest, AddMemberRequest, CreateOrganizationRequest},
        policy::PolicyRequest,
        ErrorResponse,
    },
    middleware::CurrentUser,
    models::{Organization, Permission, UserResponse},
    utils::{wants_json, Notification, ValidatedJson},
    AppState,
};

/// Organizations visible to the caller
#[utoipa::path(
    get,
    path = "/org/",
    responses((status = 200, description = "Organizations", body = Vec<Organization>)),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn list_organizations(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.org_service.list(&principal).await?))
}

#[utoipa::path(
    post,
    path = "/org/",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = Organization),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn create_organization(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let org = state
        .org_service
        .create(&principal, &req.name, &req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(org)))
}

#[utoipa::path(
    get,
    path = "/org/{id}",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization", body = Organization),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn get_organization(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.org_service.get(&principal, id).await?))
}

#[utoipa::path(
    delete,
    path = "/org/{id}",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 204, description = "Organization, memberships and policies deleted"),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn delete_organization(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.org_service.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/org/{id}/member",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Members", body = Vec<UserResponse>),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let members = state.org_service.list_members(&principal, id).await?;
    Ok(Json(
        members
            .into_iter()
            .map(UserResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    post,
    path = "/org/{id}/member",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = AddMemberRequest,
    responses(
        (status = 204, description = "Member added"),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn add_member(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .org_service
        .add_member(&principal, id, req.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/org/{id}/member/{user_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member id")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not a member", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .org_service
        .remove_member(&principal, id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/org/{id}/policy",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Policies inherited by every member", body = Vec<Permission>),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn list_organization_policies(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.org_service.list_policies(&principal, id).await?))
}

#[utoipa::path(
    post,
    path = "/org/{id}/policy",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = PolicyRequest,
    responses(
        (status = 201, description = "Policy added", body = Permission),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn add_organization_policy(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let permission = state.org_service.add_policy(&principal, id, &req).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    delete,
    path = "/org/{id}/policy/{policy_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("policy_id" = Uuid, Path, description = "Policy id")
    ),
    responses(
        (status = 204, description = "Policy removed"),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn delete_organization_policy(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((id, policy_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .org_service
        .delete_policy(&principal, id, policy_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Email an invitation to join the organization
#[utoipa::path(
    post,
    path = "/org/{id}/invite",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = EmailRequest,
    responses(
        (status = 201, description = "Invite sent", body = InviteResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn invite_member(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite_id = state.org_service.invite(&principal, id, &req.email).await?;
    Ok((StatusCode::CREATED, Json(InviteResponse { invite_id })))
}

/// Accept an organization invite from the emailed link
pub async fn accept_invite_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(principal): CurrentUser,
    Query(link): Query<LinkQuery>,
) -> Response {
    match state
        .org_service
        .accept_invite(&principal, &link.id, &link.token)
        .await
    {
        Ok(org) if wants_json(&headers) => Json(org).into_response(),
        Ok(org) => redirect_with(
            CookieJar::new(),
            "/",
            Notification::success(format!("You joined {}", org.name)),
        ),
        Err(e) => failure(&headers, e, "/"),
    }
}

#[utoipa::path(
    post,
    path = "/org/invite/accept",
    request_body = AcceptInviteRequest,
    responses(
        (status = 200, description = "Joined the organization", body = Organization),
        (status = 400, description = "Invalid or used invite", body = ErrorResponse)
    ),
    tag = "Organization",
    security(("session" = []))
)]
pub async fn accept_invite(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ValidatedJson(req): ValidatedJson<AcceptInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let org = state
        .org_service
        .accept_invite(&principal, &req.id, &req.token)
        .await?;
    Ok(Json(org))
}
