//! W3C Trace Context propagation for calls between the services of this
//! workspace (e.g. a token verifier fetching the signer's public key).
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::HeaderMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header name for W3C traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header name for W3C tracestate
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Header name for request correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Inject current trace context into outgoing HTTP request headers.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );

    if let Ok(value) = traceparent.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty() {
        if let Ok(value) = tracestate.parse() {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}
