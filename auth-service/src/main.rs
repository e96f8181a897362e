use auth_service::{
    build_router,
    config::AuthConfig,
    db, load_templates,
    services::{Database, EmailService},
    AppState, Dependencies,
};
use service_core::error::AppError;
use service_core::kv::RedisStore;
use service_core::middleware::metrics::install_recorder;
use service_core::observability::logging::init_tracing;
use service_core::utils::shutdown::shutdown_signal;
use service_core::utils::signer::Signer;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
            None
        }
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    let version = db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    tracing::info!(schema_version = version, "Database initialized successfully");

    let kv = RedisStore::connect(&config.redis.url, &config.redis.namespace)
        .await
        .map_err(AppError::InternalError)?;
    tracing::info!("Redis store initialized");

    let signer = Signer::from_pem_file(&config.signer.private_key_path)
        .map_err(|e| AppError::ConfigError(e.into()))?;
    tracing::info!(path = %config.signer.private_key_path, "Signing key loaded");

    let templates = load_templates(&config)?;
    let email = EmailService::new(&config.smtp, templates)?;

    let root = (config.root.email.clone(), config.root.password.clone());
    let port = config.common.port;

    let state = AppState::new(
        config,
        Dependencies {
            store: Arc::new(Database::new(pool)),
            kv: Arc::new(kv),
            email: Arc::new(email),
            signer: Arc::new(signer),
            key_provider: None,
            metrics,
        },
    )?;

    // Cross-instance policy cache invalidation
    let _invalidator = state.access.spawn_invalidator().await?;

    if let (Some(email), Some(password)) = root {
        let user = state.auth_service.create_root_user(&email, &password).await?;
        tracing::info!(user_id = %user.id, "Root user ready");
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Authentication service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Authentication service shut down");
    Ok(())
}
