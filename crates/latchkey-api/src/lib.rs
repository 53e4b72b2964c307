//! Latchkey API - HTTP session authority
//!
//! Registration, password and Yandex ID login, refresh token rotation,
//! logout, password reset, and profile endpoints under `/api`, plus health
//! probes, Prometheus metrics, and an OpenAPI document.
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use latchkey_core::AppConfig;
use openapi::ApiDoc;
use state::AppState;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// CORS for the configured browser origins, with credentials so the refresh
/// cookie is sent on cross-origin calls
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    middleware::register_metrics();
    let cors = cors_layer(&state.config.server.cors_origins);

    let api = Router::new()
        .nest("/api", routes::api_routes(state.clone()))
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::prometheus_metrics))
        .layer(from_fn(middleware::security_headers_middleware))
        .with_state(state);

    // Swagger UI is merged outside the security headers layer: its page needs scripts
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Router over fresh in-memory stores, for integration tests
///
/// Uses light Argon2 parameters so tests stay fast.
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(testing_state(AppConfig::default())))
}

/// In-memory state with light password hashing parameters
pub fn testing_state(mut config: AppConfig) -> AppState {
    config.password.memory_cost = 1024;
    config.password.time_cost = 1;
    config.password.parallelism = 1;
    AppState::in_memory(config)
}
