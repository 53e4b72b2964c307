//! Metrics tracking middleware
//!
//! Request counts, latency, and authentication outcomes are recorded in a
//! process-wide Prometheus registry and exposed at `/metrics`.
//!
//! Author: hephaex@gmail.com

use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("latchkey_http_requests_total", "HTTP requests by endpoint and status"),
        &["method", "endpoint", "status"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    static ref HTTP_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("latchkey_http_request_duration_seconds", "HTTP request latency")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["endpoint"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    static ref AUTH_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("latchkey_auth_events_total", "Authentication operations by outcome"),
        &["operation", "outcome"]
    )
    .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));

    static ref UPTIME: IntGauge = IntGauge::new("latchkey_uptime_seconds", "Time since server start")
        .unwrap_or_else(|e| panic!("invalid metric definition: {e}"));
}

/// Register all collectors; later calls are no-ops
pub fn register_metrics() {
    // AlreadyReg on repeated calls (one registry shared by every router built in tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_LATENCY.clone()));
    let _ = REGISTRY.register(Box::new(AUTH_EVENTS.clone()));
    let _ = REGISTRY.register(Box::new(UPTIME.clone()));
}

/// Count an authentication operation (`login`, `refresh`, ...) as `success` or `failure`
pub fn record_auth_event(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    AUTH_EVENTS.with_label_values(&[operation, outcome]).inc();
}

/// Prometheus text exposition of the registry
pub fn render_metrics(uptime_secs: u64) -> String {
    UPTIME.set(uptime_secs as i64);

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Metrics tracking middleware
///
/// Records request count per endpoint and status, and request latency.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS
        .with_label_values(&[&method, &endpoint, &status])
        .inc();
    HTTP_LATENCY
        .with_label_values(&[&endpoint])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Normalize endpoint paths for consistent metrics
///
/// Replaces UUID/ID segments, and the username in `/api/user/:username`,
/// with placeholders to keep label cardinality bounded.
fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let normalized: Vec<&str> = segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            if is_uuid(seg) || is_numeric(seg) {
                ":id"
            } else if i > 0 && segments[i - 1] == "user" {
                ":username"
            } else {
                *seg
            }
        })
        .collect();

    normalized.join("/")
}

/// Check if a string looks like a UUID
fn is_uuid(s: &str) -> bool {
    s.len() == 36
        && s.chars().enumerate().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// Check if a string is numeric (likely an ID)
fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
