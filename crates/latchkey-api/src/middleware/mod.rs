//! HTTP middleware: security headers and metrics
//!
//! Author: hephaex@gmail.com

pub mod metrics;
pub mod security_headers;

pub use metrics::{metrics_middleware, record_auth_event, register_metrics, render_metrics};
pub use security_headers::security_headers_middleware;
