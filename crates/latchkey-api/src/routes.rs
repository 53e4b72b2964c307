//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{auth_middleware, require_any_role};
use crate::handlers::{auth, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use latchkey_core::ROLE_ADMIN;
use std::sync::Arc;

const ADMIN_ONLY: &[&str] = &[ROLE_ADMIN];

/// Routes mounted under `/api`
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no access token; refresh/logout read the cookie)
    let public_routes = Router::new()
        .route("/registration", post(auth::register_handler))
        .route("/signin", post(auth::login_handler))
        .route("/login", post(auth::login_handler))
        .route("/auth/yandex", post(auth::yandex_login_handler))
        .route("/logout", get(auth::logout_handler))
        .route("/refresh", get(auth::refresh_handler))
        .route("/forgot-password", post(auth::forgot_password_handler))
        .route("/reset-password", post(auth::reset_password_handler));

    // Protected routes (access token required)
    let protected_routes = Router::new()
        .route("/me", get(users::me_handler).patch(users::update_me_handler))
        .route("/user/:username", get(users::get_user_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Admin routes: the role check runs after the access check
    let admin_routes = Router::new()
        .route("/users", get(users::list_users_handler))
        .route_layer(middleware::from_fn(require_any_role(ADMIN_ONLY)))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}
