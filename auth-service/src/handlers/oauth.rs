use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use super::{failure, found};
use crate::{
    dtos::{
        oauth::{
            ApplicationSecretResponse, AuthorizeQuery, CreateApplicationRequest,
            OAuthErrorResponse, TokenRequest, TokenResponse, UpdateApplicationRequest,
        },
        ErrorResponse,
    },
    middleware::CurrentUser,
    models::ApplicationResponse,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Approve an authorization request and redirect back to the client
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    params(AuthorizeQuery),
    responses(
        (status = 302, description = "Redirect to redirect_uri with code and state"),
        (status = 400, description = "Unsupported response type or redirect URI mismatch", body = ErrorResponse),
        (status = 403, description = "Not allowed to authorize this application", body = ErrorResponse),
        (status = 404, description = "Unknown client", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(principal): CurrentUser,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    if query.response_type.as_deref().is_some_and(|t| t != "code") {
        return AppError::BadRequest(anyhow::anyhow!("unsupported_response_type")).into_response();
    }

    match state
        .oauth_service
        .authorize(
            &principal,
            &query.client_id,
            query.redirect_uri.as_deref(),
            query.state.as_deref(),
        )
        .await
    {
        Ok(location) => found(&location),
        Err(e) => failure(&headers, e, "/"),
    }
}

fn oauth_error(err: ServiceError) -> Response {
    let (status, code) = match err {
        ServiceError::InvalidClient => (StatusCode::UNAUTHORIZED, "invalid_client"),
        ServiceError::InvalidGrant | ServiceError::InvalidRedirectUri => {
            (StatusCode::BAD_REQUEST, "invalid_grant")
        }
        ServiceError::UnsupportedGrantType => (StatusCode::BAD_REQUEST, "unsupported_grant_type"),
        other => return AppError::from(other).into_response(),
    };
    (
        status,
        [(header::CACHE_CONTROL, "no-store")],
        Json(OAuthErrorResponse {
            error: code.to_string(),
        }),
    )
        .into_response()
}

/// Exchange an authorization code or refresh token for an access token
#[utoipa::path(
    post,
    path = "/oauth/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "invalid_grant or unsupported_grant_type", body = OAuthErrorResponse),
        (status = 401, description = "invalid_client", body = OAuthErrorResponse)
    ),
    tag = "OAuth"
)]
pub async fn token(State(state): State<AppState>, Form(req): Form<TokenRequest>) -> Response {
    match state.oauth_service.exchange(&req).await {
        Ok(tokens) => ([(header::CACHE_CONTROL, "no-store")], Json(tokens)).into_response(),
        Err(e) => oauth_error(e),
    }
}

/// List applications visible to the caller
#[utoipa::path(
    get,
    path = "/oauth/application/",
    responses(
        (status = 200, description = "Applications", body = Vec<ApplicationResponse>)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn list_applications(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let apps = state.oauth_service.list_apps(&principal).await?;
    Ok(Json(
        apps.into_iter()
            .map(ApplicationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Register an application
#[utoipa::path(
    post,
    path = "/oauth/application/",
    request_body = CreateApplicationRequest,
    responses(
        (status = 201, description = "Application created; the secret is shown once", body = ApplicationSecretResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn create_application(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ValidatedJson(req): ValidatedJson<CreateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (app, client_secret) = state.oauth_service.create_app(&principal, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApplicationSecretResponse {
            application: app.into(),
            client_secret,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/oauth/application/{id}",
    params(("id" = Uuid, Path, description = "Application id")),
    responses(
        (status = 200, description = "Application", body = ApplicationResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn get_application(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let app = state.oauth_service.get_app(&principal, id).await?;
    Ok(Json(ApplicationResponse::from(app)))
}

#[utoipa::path(
    put,
    path = "/oauth/application/{id}",
    params(("id" = Uuid, Path, description = "Application id")),
    request_body = UpdateApplicationRequest,
    responses(
        (status = 200, description = "Application updated", body = ApplicationResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn update_application(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let app = state.oauth_service.update_app(&principal, id, &req).await?;
    Ok(Json(ApplicationResponse::from(app)))
}

/// Issue a new client secret
#[utoipa::path(
    post,
    path = "/oauth/application/{id}/secret",
    params(("id" = Uuid, Path, description = "Application id")),
    responses(
        (status = 200, description = "Secret rotated; shown once", body = ApplicationSecretResponse),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn rotate_application_secret(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (app, client_secret) = state.oauth_service.rotate_secret(&principal, id).await?;
    Ok(Json(ApplicationSecretResponse {
        application: app.into(),
        client_secret,
    }))
}

#[utoipa::path(
    delete,
    path = "/oauth/application/{id}",
    params(("id" = Uuid, Path, description = "Application id")),
    responses(
        (status = 204, description = "Application and its refresh tokens deleted"),
        (status = 403, description = "Not allowed", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "OAuth",
    security(("session" = []))
)]
pub async fn delete_application(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.oauth_service.delete_app(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
