use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Logs are emitted as flattened JSON. When `otlp_endpoint` is set, spans are
/// additionally exported over OTLP/gRPC; a failure to build the exporter is
/// reported and the service continues with local logging only.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .json()
        .flatten_event(true);

    let tracer = otlp_endpoint.and_then(|endpoint| {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);

        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", service_name.to_string()),
            ])))
            .install_batch(runtime::Tokio)
        {
            Ok(tracer) => Some(tracer),
            Err(e) => {
                eprintln!(
                    "Failed to initialize OTLP tracer for service '{}' at endpoint '{}': {}",
                    service_name, endpoint, e
                );
                None
            }
        }
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match tracer {
        Some(tracer) => registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init(),
        None => registry.init(),
    }
}
