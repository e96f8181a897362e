use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use super::session::CurrentSession;
use crate::{services::ServiceError, AppState};

pub const CSRF_HEADER: &str = "x-csrf-token";

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Require `X-CSRF-Token` to match the session's token on state-changing
/// requests, and hand out a fresh token once the request succeeds.
///
/// Must run after [`super::session_middleware`].
pub async fn csrf_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_safe(req.method()) {
        return next.run(req).await;
    }

    let Some(session) = req.extensions().get::<CurrentSession>().cloned() else {
        return AppError::Unauthorized(anyhow::anyhow!("Authentication required")).into_response();
    };

    let presented = req
        .headers()
        .get(CSRF_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    let matches: bool = presented
        .ct_eq(session.data.csrf_token.as_bytes())
        .into();
    if !matches {
        tracing::warn!(user_id = %session.data.user_id, "CSRF token mismatch");
        return AppError::Forbidden(anyhow::anyhow!("Invalid CSRF token")).into_response();
    }

    let mut response = next.run(req).await;

    let status = response.status();
    if status.is_success() || status.is_redirection() {
        match state.sessions.rotate_csrf(&session.id).await {
            Ok(token) => {
                if let Ok(value) = HeaderValue::from_str(&token) {
                    response.headers_mut().insert(CSRF_HEADER, value);
                }
            }
            // The handler ended the session.
            Err(ServiceError::SessionNotFound) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to rotate CSRF token"),
        }
    }

    response
}
