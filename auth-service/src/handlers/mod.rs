//! HTTP handlers.
//!
//! Browser-facing routes answer with a redirect and a flash notification;
//! callers that send or accept JSON get plain status codes instead.

pub mod auth;
pub mod key;
pub mod metrics;
pub mod oauth;
pub mod org;
pub mod pages;
pub mod policy;
pub mod user;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::services::ServiceError;
use crate::utils::{cookies, wants_json, Notification};

/// 302 to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub(crate) fn redirect_with(jar: CookieJar, target: &str, notice: Notification) -> Response {
    (jar.add(notice.cookie(target)), found(target)).into_response()
}

/// Render a service failure. Browsers are sent back to `target` with the
/// message unless the failure is internal.
pub(crate) fn failure(headers: &HeaderMap, err: ServiceError, target: &str) -> Response {
    if wants_json(headers) || err.is_internal() {
        return AppError::from(err).into_response();
    }
    redirect_with(CookieJar::new(), target, Notification::error(err.to_string()))
}

/// Pop the flash notification addressed to `path`.
pub(crate) fn take_notice(jar: CookieJar, path: &'static str) -> (CookieJar, Option<Notification>) {
    match Notification::from_jar(&jar) {
        Some(notice) => (
            jar.add(cookies::removal(cookies::NOTIFICATIONS_COOKIE, path)),
            Some(notice),
        ),
        None => (jar, None),
    }
}
