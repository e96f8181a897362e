use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    models::Principal,
    services::{ServiceError, SessionData, SESSION_COOKIE},
    utils::{cookies, wants_json},
    AppState,
};

/// The resolved session, placed in request extensions by [`session_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub data: SessionData,
}

/// Resolve the `session_id` cookie into a [`CurrentSession`].
///
/// Browsers navigating to a protected page are sent to the login form with a
/// `return_to` cookie; everything else gets a 401.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let session_id = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.parse_cookie(cookie.value()));

    let Some(id) = session_id else {
        return unauthenticated(&state, &req);
    };

    match state.sessions.find(&id).await {
        Ok(data) => {
            tracing::Span::current().record("user_id", tracing::field::display(data.user_id));
            req.extensions_mut().insert(CurrentSession { id, data });
            next.run(req).await
        }
        Err(ServiceError::SessionNotFound) => unauthenticated(&state, &req),
        Err(e) => AppError::from(e).into_response(),
    }
}

fn unauthenticated(state: &AppState, req: &Request) -> Response {
    if req.method() == Method::GET && !wants_json(req.headers()) {
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let jar = CookieJar::new().add(cookies::return_to(
            target,
            state.config.session.secure_cookies,
        ));
        return (jar, Redirect::to("/auth/login")).into_response();
    }

    AppError::Unauthorized(anyhow::anyhow!("Authentication required")).into_response()
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

/// Extractor for the authenticated caller.
pub struct CurrentUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = CurrentSession::from_request_parts(parts, state).await?;
        Ok(CurrentUser(session.data.principal()))
    }
}
