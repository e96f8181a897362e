//! Cookie builders shared by the middleware and the browser-facing handlers.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::services::SESSION_COOKIE;

pub const ACCESS_TOKEN_COOKIE: &str = "X-Access-Token";
pub const RETURN_TO_COOKIE: &str = "return_to";
pub const NOTIFICATIONS_COOKIE: &str = "notifications";

const LOGIN_PATH: &str = "/auth/login";
const RETURN_TO_TTL_SECONDS: i64 = 300;

pub fn session(value: String, secure: bool, ttl_seconds: u64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl_seconds as i64))
        .build()
}

pub fn access_token(value: String, secure: bool, ttl_seconds: i64) -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(ttl_seconds))
        .build()
}

/// Remember where to send the browser after it signs in.
pub fn return_to(target: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((RETURN_TO_COOKIE, target.to_string()))
        .path(LOGIN_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(RETURN_TO_TTL_SECONDS))
        .build()
}

/// Expire `name` at `path`.
pub fn removal(name: &'static str, path: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).path(path).build();
    cookie.make_removal();
    cookie
}

/// Only local absolute paths are honoured, so the cookie cannot become an
/// open redirect.
pub fn safe_return_target(jar: &CookieJar) -> Option<String> {
    let target = jar.get(RETURN_TO_COOKIE)?.value();
    if target.starts_with('/') && !target.starts_with("//") && !target.contains('\\') {
        Some(target.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

/// One-shot message shown on the page a browser is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }

    /// Flash cookie scoped to the redirect target's path.
    pub fn cookie(&self, target: &str) -> Cookie<'static> {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let path = target.split('?').next().unwrap_or("/").to_string();
        Cookie::build((NOTIFICATIONS_COOKIE, URL_SAFE_NO_PAD.encode(json)))
            .path(path)
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }

    pub fn from_jar(jar: &CookieJar) -> Option<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(jar.get(NOTIFICATIONS_COOKIE)?.value())
            .ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_target_rejects_foreign_hosts() {
        let jar = CookieJar::new().add(Cookie::new(RETURN_TO_COOKIE, "/oauth/authorize?client_id=x"));
        assert_eq!(
            safe_return_target(&jar).as_deref(),
            Some("/oauth/authorize?client_id=x")
        );

        for bad in ["//evil.example", "https://evil.example", "/\\evil.example"] {
            let jar = CookieJar::new().add(Cookie::new(RETURN_TO_COOKIE, bad));
            assert!(safe_return_target(&jar).is_none(), "{}", bad);
        }
    }

    #[test]
    fn test_notification_cookie_round_trip() {
        let notice = Notification::error("Invalid password");
        let cookie = notice.cookie("/auth/login?x=1");
        assert_eq!(cookie.path(), Some("/auth/login"));

        let jar = CookieJar::new().add(cookie);
        assert_eq!(Notification::from_jar(&jar), Some(notice));
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session("abc.def".into(), true, 60);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
