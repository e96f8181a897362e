pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::kv::KeyValueStore;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use service_core::utils::signer::{PublicKeyProvider, Signer};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AuthConfig, Environment, SwaggerMode};
use crate::services::{
    AccessControl, AuthService, AuthStore, EmailProvider, OAuthService, OrganizationService,
    PolicyModel, SessionStore, StorePolicyProvider, TemplateSet, TokenVault, UserService,
};
use crate::utils::PasswordHasher;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::key::signer_key,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::userinfo,
        handlers::auth::register,
        handlers::auth::verify,
        handlers::auth::resend_verification,
        handlers::auth::forgot,
        handlers::auth::reset,
        handlers::auth::invite,
        handlers::auth::change_password,
        handlers::user::list_users,
        handlers::user::list_user_policies,
        handlers::user::add_user_policy,
        handlers::user::delete_user_policy,
        handlers::org::list_organizations,
        handlers::org::create_organization,
        handlers::org::get_organization,
        handlers::org::delete_organization,
        handlers::org::list_members,
        handlers::org::add_member,
        handlers::org::remove_member,
        handlers::org::list_organization_policies,
        handlers::org::add_organization_policy,
        handlers::org::delete_organization_policy,
        handlers::org::invite_member,
        handlers::org::accept_invite,
        handlers::oauth::authorize,
        handlers::oauth::token,
        handlers::oauth::list_applications,
        handlers::oauth::create_application,
        handlers::oauth::get_application,
        handlers::oauth::update_application,
        handlers::oauth::rotate_application_secret,
        handlers::oauth::delete_application,
        handlers::policy::effective_policies,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RegisterRequest,
            dtos::auth::EmailRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::UserInfoResponse,
            dtos::auth::InviteResponse,
            dtos::oauth::TokenRequest,
            dtos::oauth::TokenResponse,
            dtos::oauth::OAuthErrorResponse,
            dtos::oauth::CreateApplicationRequest,
            dtos::oauth::UpdateApplicationRequest,
            dtos::oauth::ApplicationSecretResponse,
            dtos::org::CreateOrganizationRequest,
            dtos::org::AddMemberRequest,
            dtos::org::AcceptInviteRequest,
            dtos::policy::PolicyRequest,
            models::UserResponse,
            models::ApplicationResponse,
            models::Organization,
            models::Permission,
            models::PolicyRule,
            models::Effect,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Sessions, registration and password flows"),
        (name = "OAuth", description = "Authorization-code grant and client applications"),
        (name = "User", description = "Users and their direct policies"),
        (name = "Organization", description = "Organizations, members and shared policies"),
        (name = "Policy", description = "Effective access-control rules"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("session_id"))),
            );
            components.add_security_scheme(
                "access_token",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("X-Access-Token"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn AuthStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub sessions: SessionStore,
    pub signer: Arc<Signer>,
    pub key_provider: Arc<dyn PublicKeyProvider>,
    pub access: Arc<AccessControl>,
    pub auth_service: AuthService,
    pub oauth_service: OAuthService,
    pub org_service: OrganizationService,
    pub user_service: UserService,
    pub metrics: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

/// Collaborators [`AppState::new`] wires the services from.
pub struct Dependencies {
    pub store: Arc<dyn AuthStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub email: Arc<dyn EmailProvider>,
    pub signer: Arc<Signer>,
    /// Verifies access tokens; the local signer unless another service holds the key.
    pub key_provider: Option<Arc<dyn PublicKeyProvider>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AuthConfig, deps: Dependencies) -> Result<Self, AppError> {
        let model = match &config.access_control.model_path {
            Some(path) => PolicyModel::parse(&std::fs::read_to_string(path)?),
            None => PolicyModel::default_model(),
        }
        .map_err(|e| AppError::ConfigError(e.into()))?;

        let hasher = PasswordHasher::new(config.password);
        let vault = TokenVault::new(deps.kv.clone(), hasher.clone(), config.tokens);
        let sessions = SessionStore::new(
            deps.kv.clone(),
            config.session.signing_key.as_bytes(),
            config.session.ttl_seconds,
        );

        let access = Arc::new(AccessControl::new(
            model,
            Arc::new(StorePolicyProvider::new(deps.store.clone())),
            deps.kv.clone(),
            config.access_control.policy_cache_ttl_seconds,
        ));

        let auth_service = AuthService::new(
            deps.store.clone(),
            vault.clone(),
            hasher.clone(),
            deps.email.clone(),
            access.clone(),
            config.base_url.clone(),
        );
        let oauth_service = OAuthService::new(
            deps.store.clone(),
            vault.clone(),
            hasher,
            deps.signer.clone(),
            access.clone(),
            config.signer.access_token_ttl_seconds,
            config.oauth.rotate_refresh_tokens,
        );
        let org_service = OrganizationService::new(
            deps.store.clone(),
            vault,
            deps.email,
            access.clone(),
            config.base_url.clone(),
        );
        let user_service = UserService::new(deps.store.clone(), access.clone());

        let key_provider = deps
            .key_provider
            .unwrap_or_else(|| deps.signer.clone() as Arc<dyn PublicKeyProvider>);

        Ok(Self {
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            ip_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.global_ip_limit,
                config.rate_limit.global_ip_window_seconds,
            ),
            config,
            store: deps.store,
            kv: deps.kv,
            sessions,
            signer: deps.signer,
            key_provider,
            access,
            auth_service,
            oauth_service,
            org_service,
            user_service,
            metrics: deps.metrics,
        })
    }
}

/// Template set for outgoing mail, honouring `TEMPLATE_DIR` overrides.
pub fn load_templates(config: &AuthConfig) -> Result<Arc<TemplateSet>, AppError> {
    TemplateSet::load(config.smtp.template_dir.as_deref())
        .map(Arc::new)
        .map_err(AppError::from)
}

pub fn build_router(state: AppState) -> Router {
    // Credential submissions get a tighter per-IP budget.
    let credential_routes = Router::new()
        .route(
            "/auth/login",
            get(handlers::auth::login_form).post(handlers::auth::login),
        )
        .route(
            "/auth/register",
            get(handlers::auth::register_form).post(handlers::auth::register),
        )
        .route(
            "/auth/forgot",
            get(handlers::auth::forgot_form).post(handlers::auth::forgot),
        )
        .route(
            "/auth/reset",
            get(handlers::auth::reset_form).post(handlers::auth::reset),
        )
        .route(
            "/auth/verify/resend",
            post(handlers::auth::resend_verification),
        )
        .route("/oauth/token", post(handlers::oauth::token))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // Session required; state-changing methods also need the CSRF header.
    let session_routes = Router::new()
        .route("/auth/userinfo", get(handlers::auth::userinfo))
        .route("/auth/invite", post(handlers::auth::invite))
        .route("/auth/password", post(handlers::auth::change_password))
        .route("/user/", get(handlers::user::list_users))
        .route(
            "/user/:id/policy",
            get(handlers::user::list_user_policies).post(handlers::user::add_user_policy),
        )
        .route(
            "/user/:id/policy/:policy_id",
            axum::routing::delete(handlers::user::delete_user_policy),
        )
        .route(
            "/org/",
            get(handlers::org::list_organizations).post(handlers::org::create_organization),
        )
        .route(
            "/org/invite/accept",
            get(handlers::org::accept_invite_link).post(handlers::org::accept_invite),
        )
        .route(
            "/org/:id",
            get(handlers::org::get_organization).delete(handlers::org::delete_organization),
        )
        .route(
            "/org/:id/member",
            get(handlers::org::list_members).post(handlers::org::add_member),
        )
        .route(
            "/org/:id/member/:user_id",
            axum::routing::delete(handlers::org::remove_member),
        )
        .route(
            "/org/:id/policy",
            get(handlers::org::list_organization_policies)
                .post(handlers::org::add_organization_policy),
        )
        .route(
            "/org/:id/policy/:policy_id",
            axum::routing::delete(handlers::org::delete_organization_policy),
        )
        .route("/org/:id/invite", post(handlers::org::invite_member))
        .route("/oauth/authorize", get(handlers::oauth::authorize))
        .route(
            "/oauth/application/",
            get(handlers::oauth::list_applications).post(handlers::oauth::create_application),
        )
        .route(
            "/oauth/application/:id",
            get(handlers::oauth::get_application)
                .put(handlers::oauth::update_application)
                .delete(handlers::oauth::delete_application),
        )
        .route(
            "/oauth/application/:id/secret",
            post(handlers::oauth::rotate_application_secret),
        )
        .merge(
            Router::new()
                .route("/policy/", get(handlers::policy::effective_policies))
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::access_token_middleware,
                )),
        )
        .layer(from_fn_with_state(state.clone(), middleware::csrf_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    let mut app = Router::new()
        .route("/", get(handlers::auth::home))
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/key/signer", get(handlers::key::signer_key))
        .route("/auth/logout", get(handlers::auth::logout))
        .route("/auth/verify", get(handlers::auth::verify));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };
    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    app.merge(credential_routes)
        .merge(session_routes)
        .with_state(state.clone())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::AUTHORIZATION,
                    HeaderName::from_static(middleware::CSRF_HEADER),
                ])
                .expose_headers([HeaderName::from_static(middleware::CSRF_HEADER)]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A dependency is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    state.kv.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "KV health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "kv": "up"
        }
    })))
}
