use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::{error::AppError, utils::signer::verify_access_token};

use super::session::CurrentSession;
use crate::{
    services::fingerprint,
    utils::cookies::ACCESS_TOKEN_COOKIE,
    AppState,
};

/// Require a signed access token belonging to the current session, taken from
/// the `X-Access-Token` cookie or an `Authorization: Bearer` header.
///
/// Must run after [`super::session_middleware`].
pub async fn access_token_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(session) = req.extensions().get::<CurrentSession>().cloned() else {
        return AppError::Unauthorized(anyhow::anyhow!("Authentication required")).into_response();
    };

    let jar = CookieJar::from_headers(req.headers());
    let token = jar
        .get(ACCESS_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });
    let Some(token) = token else {
        return AppError::Unauthorized(anyhow::anyhow!("Missing access token")).into_response();
    };

    let claims = match verify_access_token(&token, state.key_provider.as_ref()).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "Access token rejected");
            return AppError::Unauthorized(anyhow::anyhow!("Invalid or expired access token"))
                .into_response();
        }
    };

    let same_user = claims.sub == session.data.user_id.to_string();
    let same_session = claims
        .sid
        .as_deref()
        .map_or(true, |sid| sid == fingerprint(&session.id));
    if !same_user || !same_session {
        tracing::warn!(user_id = %session.data.user_id, "Access token does not belong to session");
        return AppError::Unauthorized(anyhow::anyhow!("Invalid or expired access token"))
            .into_response();
    }

    req.extensions_mut().insert(claims);
    next.run(req).await
}
