//! OpenAPI document
//!
//! Author: hephaex@gmail.com

use crate::auth::models::{
    AuthResponse, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest, UpdateProfileRequest, UpdateProfileResponse, UserInfo,
    UserProfile, UserPublic, YandexLoginRequest,
};
use crate::error::ApiError;
use crate::handlers::{auth, health, users};
use crate::handlers::health::{HealthResponse, ReadinessChecks, ReadinessResponse};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Latchkey API",
        description = "Session authority: registration, login, refresh rotation, Yandex ID linking, password reset"
    ),
    paths(
        auth::register_handler,
        auth::login_handler,
        auth::yandex_login_handler,
        auth::logout_handler,
        auth::refresh_handler,
        auth::forgot_password_handler,
        auth::reset_password_handler,
        users::me_handler,
        users::update_me_handler,
        users::get_user_handler,
        users::list_users_handler,
        health::health_check,
        health::readiness_check,
    ),
    components(schemas(
        ApiError,
        AuthResponse,
        UserInfo,
        UserProfile,
        UserPublic,
        RegisterRequest,
        LoginRequest,
        YandexLoginRequest,
        ForgotPasswordRequest,
        ForgotPasswordResponse,
        ResetPasswordRequest,
        UpdateProfileRequest,
        UpdateProfileResponse,
        MessageResponse,
        HealthResponse,
        ReadinessResponse,
        ReadinessChecks,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Session lifecycle"),
        (name = "users", description = "Profiles"),
        (name = "health", description = "Probes"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected paths
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
