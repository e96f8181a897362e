use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::{error::AppError, utils::signer::AccessTokenClaims};
use uuid::Uuid;

use super::{failure, found, pages, redirect_with, take_notice};
use crate::{
    dtos::{
        auth::{
            ChangePasswordRequest, EmailRequest, InviteResponse, LinkQuery, LoginRequest,
            RegisterRequest, ResetPasswordRequest, ResetQuery, UserInfoResponse,
        },
        ErrorResponse, MessageResponse,
    },
    middleware::{CurrentSession, CurrentUser},
    models::{User, UserResponse},
    services::{fingerprint, ServiceError, SessionData, SESSION_COOKIE},
    utils::{
        cookies::{self, ACCESS_TOKEN_COOKIE, RETURN_TO_COOKIE},
        wants_json, Notification, ValidatedInput,
    },
    AppState,
};

const LOGIN_PATH: &str = "/auth/login";

fn user_info(data: &SessionData) -> UserInfoResponse {
    UserInfoResponse {
        user_id: data.user_id,
        name: data.name.clone(),
        email: data.email.clone(),
        csrf_token: data.csrf_token.clone(),
    }
}

/// Replace any existing session with a new one for `user` and attach the
/// session and access-token cookies.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> Result<(CookieJar, SessionData), AppError> {
    if let Some(previous) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.parse_cookie(c.value()))
    {
        state.sessions.destroy(&previous).await?;
    }

    let (id, data) = state.sessions.create(user).await?;

    let ttl = state.config.signer.access_token_ttl_seconds;
    let mut claims = AccessTokenClaims::new(user.id.to_string(), ttl);
    claims.sid = Some(fingerprint(&id));
    let token = state
        .signer
        .issue(&claims)
        .map_err(|e| AppError::InternalError(e.into()))?;

    let secure = state.config.session.secure_cookies;
    let jar = jar
        .add(cookies::session(
            state.sessions.cookie_value(&id)?,
            secure,
            state.sessions.ttl_seconds(),
        ))
        .add(cookies::access_token(token, secure, ttl));
    Ok((jar, data))
}

pub async fn home(State(state): State<AppState>, jar: CookieJar) -> Response {
    let session = match jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.parse_cookie(c.value()))
    {
        Some(id) => state.sessions.find(&id).await.ok(),
        None => None,
    };
    let (jar, notice) = take_notice(jar, "/");
    let principal = session.map(|s| s.principal());
    (jar, pages::home(principal.as_ref(), notice.as_ref())).into_response()
}

pub async fn login_form(jar: CookieJar) -> Response {
    let (jar, notice) = take_notice(jar, LOGIN_PATH);
    (jar, pages::login(notice.as_ref())).into_response()
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = UserInfoResponse),
        (status = 302, description = "Browser redirect to the return_to target or /"),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedInput(req): ValidatedInput<LoginRequest>,
) -> Response {
    let user = match state.auth_service.login_user(&req.email, &req.password).await {
        Ok(user) => user,
        Err(e) => return failure(&headers, e, LOGIN_PATH),
    };

    let (jar, data) = match start_session(&state, jar, &user).await {
        Ok(started) => started,
        Err(e) => return e.into_response(),
    };

    if wants_json(&headers) {
        return (jar, Json(user_info(&data))).into_response();
    }

    let target = cookies::safe_return_target(&jar).unwrap_or_else(|| "/".to_string());
    let jar = jar.add(cookies::removal(RETURN_TO_COOKIE, LOGIN_PATH));
    (jar, found(&target)).into_response()
}

/// End the current session
#[utoipa::path(
    get,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 302, description = "Browser redirect to the login page")
    ),
    tag = "Authentication"
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, jar: CookieJar) -> Response {
    if let Some(id) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.parse_cookie(c.value()))
    {
        if let Err(e) = state.sessions.destroy(&id).await {
            return AppError::from(e).into_response();
        }
        tracing::info!("Session ended");
    }

    let jar = jar
        .add(cookies::removal(SESSION_COOKIE, "/"))
        .add(cookies::removal(ACCESS_TOKEN_COOKIE, "/"));

    if wants_json(&headers) {
        return (jar, Json(MessageResponse::new("Signed out"))).into_response();
    }
    redirect_with(jar, LOGIN_PATH, Notification::success("You have been signed out"))
}

/// Current user and CSRF token
#[utoipa::path(
    get,
    path = "/auth/userinfo",
    responses(
        (status = 200, description = "Session details", body = UserInfoResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn userinfo(headers: HeaderMap, session: CurrentSession) -> Response {
    if wants_json(&headers) {
        return Json(user_info(&session.data)).into_response();
    }
    pages::home(Some(&session.data.principal()), None).into_response()
}

pub async fn register_form(jar: CookieJar, Query(link): Query<LinkQuery>) -> Response {
    let (jar, notice) = take_notice(jar, "/auth/register");
    (jar, pages::register(&link.id, &link.token, notice.as_ref())).into_response()
}

/// Register through an invite
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created, verification email sent", body = UserResponse),
        (status = 400, description = "Invalid invite or password mismatch", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedInput(req): ValidatedInput<RegisterRequest>,
) -> Response {
    let result = state
        .auth_service
        .create_user(
            &req.name,
            &req.email,
            &req.password,
            &req.confirm_password,
            &req.invite_id,
            &req.invite_token,
        )
        .await;

    match result {
        Ok(user) if wants_json(&headers) => {
            (StatusCode::CREATED, Json(UserResponse::from(user))).into_response()
        }
        Ok(_) => redirect_with(
            CookieJar::new(),
            LOGIN_PATH,
            Notification::success("Account created. Check your email to verify it."),
        ),
        Err(e) => {
            let back = format!(
                "/auth/register?id={}&token={}",
                urlencoding::encode(&req.invite_id),
                urlencoding::encode(&req.invite_token)
            );
            failure(&headers, e, &back)
        }
    }
}

/// Confirm an email address from the emailed link
#[utoipa::path(
    get,
    path = "/auth/verify",
    params(LinkQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 302, description = "Browser redirect to the login page"),
        (status = 400, description = "Invalid or used token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(link): Query<LinkQuery>,
) -> Response {
    let result = match Uuid::parse_str(&link.id) {
        Ok(id) => state.auth_service.verify_user(id, &link.token).await,
        Err(_) => Err(ServiceError::InvalidRegistrationToken),
    };

    match result {
        Ok(()) if wants_json(&headers) => {
            Json(MessageResponse::new("Email verified successfully")).into_response()
        }
        Ok(()) => redirect_with(
            CookieJar::new(),
            LOGIN_PATH,
            Notification::success("Email verified. You can now sign in."),
        ),
        Err(e) => failure(&headers, e, LOGIN_PATH),
    }
}

/// Send a fresh verification email
#[utoipa::path(
    post,
    path = "/auth/verify/resend",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Verification email sent", body = MessageResponse),
        (status = 401, description = "Unknown account", body = ErrorResponse),
        (status = 409, description = "Already verified", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedInput(req): ValidatedInput<EmailRequest>,
) -> Response {
    match state.auth_service.resend_verify_email(&req.email).await {
        Ok(()) if wants_json(&headers) => (
            StatusCode::ACCEPTED,
            Json(MessageResponse::new("Verification email sent")),
        )
            .into_response(),
        Ok(()) => redirect_with(
            CookieJar::new(),
            LOGIN_PATH,
            Notification::success("Verification email sent"),
        ),
        Err(e) => failure(&headers, e, LOGIN_PATH),
    }
}

pub async fn forgot_form(jar: CookieJar) -> Response {
    let (jar, notice) = take_notice(jar, "/auth/forgot");
    (jar, pages::forgot(notice.as_ref())).into_response()
}

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/auth/forgot",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Reset link sent if the account exists", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn forgot(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedInput(req): ValidatedInput<EmailRequest>,
) -> Response {
    const SENT: &str = "If an account exists for that email, a reset link has been sent";

    match state.auth_service.create_forgot_password_token(&req.email).await {
        Ok(()) if wants_json(&headers) => {
            (StatusCode::ACCEPTED, Json(MessageResponse::new(SENT))).into_response()
        }
        Ok(()) => redirect_with(CookieJar::new(), LOGIN_PATH, Notification::success(SENT)),
        Err(e) => failure(&headers, e, "/auth/forgot"),
    }
}

pub async fn reset_form(jar: CookieJar, Query(link): Query<LinkQuery>) -> Response {
    let (jar, notice) = take_notice(jar, "/auth/reset");
    (jar, pages::reset(&link.id, &link.token, notice.as_ref())).into_response()
}

/// Set a new password with an emailed reset token
#[utoipa::path(
    post,
    path = "/auth/reset",
    params(ResetQuery),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid token or password mismatch", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(link): Query<ResetQuery>,
    ValidatedInput(req): ValidatedInput<ResetPasswordRequest>,
) -> Response {
    let id = req.id.or(link.id);
    let token = req.token.or(link.token);

    let result = match (id, token.as_deref()) {
        (Some(id), Some(token)) => {
            state
                .auth_service
                .change_password_with_token(id, token, &req.password, &req.confirm_password)
                .await
        }
        _ => Err(ServiceError::InvalidPasswordToken),
    };

    match result {
        Ok(()) if wants_json(&headers) => {
            Json(MessageResponse::new("Password changed")).into_response()
        }
        Ok(()) => redirect_with(
            CookieJar::new(),
            LOGIN_PATH,
            Notification::success("Password changed. You can now sign in."),
        ),
        Err(e) => {
            let back = match (id, token) {
                (Some(id), Some(token)) => {
                    format!("/auth/reset?id={}&token={}", id, urlencoding::encode(&token))
                }
                _ => "/auth/forgot".to_string(),
            };
            failure(&headers, e, &back)
        }
    }
}

/// Invite a new user by email
#[utoipa::path(
    post,
    path = "/auth/invite",
    request_body = EmailRequest,
    responses(
        (status = 201, description = "Invite sent", body = InviteResponse),
        (status = 403, description = "Not allowed to invite", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("session" = []))
)]
pub async fn invite(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ValidatedInput(req): ValidatedInput<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite_id = state.auth_service.invite_user(&principal, &req.email).await?;
    Ok((StatusCode::CREATED, Json(InviteResponse { invite_id })))
}

/// Change the signed-in user's password
#[utoipa::path(
    post,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Password mismatch", body = ErrorResponse),
        (status = 401, description = "Current password is wrong", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("session" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ValidatedInput(req): ValidatedInput<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(
            &principal,
            &req.current_password,
            &req.new_password,
            &req.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse::new("Password changed")))
}
