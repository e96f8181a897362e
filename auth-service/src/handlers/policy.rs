use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{dtos::ErrorResponse, middleware::CurrentUser, models::PolicyRule, AppState};

/// Effective policy set of the caller
///
/// Requires both a session and a valid access token for that session.
#[utoipa::path(
    get,
    path = "/policy/",
    responses(
        (status = 200, description = "Rules in force for the caller", body = Vec<PolicyRule>),
        (status = 401, description = "Missing session or access token", body = ErrorResponse)
    ),
    tag = "Policy",
    security(("session" = []), ("access_token" = []))
)]
pub async fn effective_policies(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let rules = state.user_service.effective_policies(&principal).await?;
    Ok(Json(rules))
}
