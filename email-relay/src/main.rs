use email_relay::{
    build_server,
    config::RelayConfig,
    forwarder::{HickoryMxResolver, LettreRelay},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use service_core::utils::shutdown::shutdown_signal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = RelayConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    if let Some(port) = config.metrics_port {
        match PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
        {
            Ok(()) => tracing::info!(port, "Prometheus exporter listening"),
            Err(e) => tracing::warn!(error = %e, "Prometheus exporter unavailable"),
        }
    }

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        hostname = %config.smtp.hostname,
        "Starting email relay"
    );

    let resolver = HickoryMxResolver::from_system_conf()
        .map_err(|e| AppError::ConfigError(e.into()))?;
    let relay = LettreRelay::new(&config.forward);
    let server = Arc::new(build_server(&config, Arc::new(resolver), Arc::new(relay))?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.smtp.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("SMTP listener on {}", addr);

    Arc::clone(&server).serve(listener, shutdown_signal()).await?;
    server
        .drain(Duration::from_secs(config.smtp.shutdown_grace_seconds))
        .await;

    tracing::info!("Email relay shut down");
    Ok(())
}
