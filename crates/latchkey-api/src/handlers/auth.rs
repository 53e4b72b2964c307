//! Authentication API handlers
//!
//! Every session-issuing endpoint answers with `{accessToken, refreshToken, user}`
//! and sets the `refreshToken` cookie. `/refresh` and `/logout` read the
//! refresh token from that cookie only.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::{
    extract_refresh_token, AuthResponse, ForgotPasswordRequest, ForgotPasswordResponse,
    LoginRequest, MessageResponse, RegisterRequest, ResetPasswordRequest, YandexLoginRequest,
};
use crate::error::AppError;
use crate::extract::JsonBody;
use crate::middleware::record_auth_event;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// Attach the refresh cookie to a session body
fn session_response(state: &AppState, session: AuthResponse) -> Result<Response, AppError> {
    let cookie = state.cookies.set_refresh(&session.refresh_token)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(session)).into_response())
}

/// Register a new user account
///
/// The bootstrap username is granted the `admin` role; everyone else gets `user`.
#[utoipa::path(
    post,
    path = "/api/registration",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User registered, refresh cookie set", body = AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Username or email taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);
    let username = request.username.trim().to_string();

    match state.sessions.register(request).await {
        Ok(session) => {
            record_auth_event("register", true);
            audit_log(&AuditEvent::RegistrationSuccess {
                user_id: session.user.id,
                username: session.user.username.clone(),
                roles: session.user.roles.clone(),
                client,
            });
            session_response(&state, session)
        }
        Err(e) => {
            record_auth_event("register", false);
            audit_log(&AuditEvent::RegistrationFailure {
                username,
                reason: e.to_string(),
                client,
            });
            Err(e)
        }
    }
}

/// Login with username and password
///
/// Unknown usernames and wrong passwords both answer `400 INVALID_CREDENTIALS`.
/// Also mounted at `/api/login`.
#[utoipa::path(
    post,
    path = "/api/signin",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, refresh cookie set", body = AuthResponse),
        (status = 400, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);
    let username = request.username.trim().to_string();

    match state.sessions.login(request).await {
        Ok(session) => {
            record_auth_event("login", true);
            audit_log(&AuditEvent::LoginSuccess {
                user_id: session.user.id,
                username: session.user.username.clone(),
                provider: "local".to_string(),
                client,
            });
            session_response(&state, session)
        }
        Err(e) => {
            record_auth_event("login", false);
            audit_log(&AuditEvent::LoginFailure {
                username: Some(username),
                provider: "local".to_string(),
                reason: e.to_string(),
                client,
            });
            Err(e)
        }
    }
}

/// Login with a Yandex ID authorization code
///
/// Links to an existing account by provider id, then by email; otherwise
/// creates a new account.
#[utoipa::path(
    post,
    path = "/api/auth/yandex",
    tag = "auth",
    request_body = YandexLoginRequest,
    responses(
        (status = 200, description = "Login successful, refresh cookie set", body = AuthResponse),
        (status = 400, description = "Missing code or provider failure", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn yandex_login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<YandexLoginRequest>,
) -> Result<Response, AppError> {
    let client = ClientInfo::from_headers(&headers);

    match state
        .linking
        .login(request.code.as_deref(), request.redirect_uri.as_deref())
        .await
    {
        Ok(session) => {
            record_auth_event("yandex", true);
            audit_log(&AuditEvent::LoginSuccess {
                user_id: session.user.id,
                username: session.user.username.clone(),
                provider: "yandex".to_string(),
                client,
            });
            session_response(&state, session)
        }
        Err(e) => {
            record_auth_event("yandex", false);
            audit_log(&AuditEvent::LoginFailure {
                username: None,
                provider: "yandex".to_string(),
                reason: e.to_string(),
                client,
            });
            Err(e)
        }
    }
}

/// Logout the current session
///
/// Deletes the ledger entry owned by the cookie's refresh token and clears
/// the cookie. Succeeds even without a cookie.
#[utoipa::path(
    get,
    path = "/api/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out, refresh cookie cleared", body = MessageResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = extract_refresh_token(&headers);
    let user_id = state.sessions.logout(token.as_deref()).await?;

    record_auth_event("logout", true);
    audit_log(&AuditEvent::Logout {
        user_id,
        client: ClientInfo::from_headers(&headers),
    });

    Ok((
        [(header::SET_COOKIE, state.cookies.clear_refresh())],
        Json(MessageResponse::new("Logged out successfully")),
    )
        .into_response())
}

/// Rotate the refresh token
///
/// The presented token is consumed: it must be the latest one issued to its
/// user. A new pair is issued and the cookie replaced.
#[utoipa::path(
    get,
    path = "/api/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Tokens rotated, refresh cookie replaced", body = AuthResponse),
        (status = 401, description = "Refresh token missing, invalid, or superseded", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = extract_refresh_token(&headers);
    let client = ClientInfo::from_headers(&headers);

    match state.sessions.refresh(token.as_deref()).await {
        Ok(session) => {
            record_auth_event("refresh", true);
            audit_log(&AuditEvent::TokenRefresh {
                user_id: session.user.id,
                client,
            });
            session_response(&state, session)
        }
        Err(e) => {
            record_auth_event("refresh", false);
            if matches!(e, AppError::Unauthorized(_)) {
                audit_log(&AuditEvent::RefreshRejected {
                    reason: e.to_string(),
                    client,
                });
            }
            Err(e)
        }
    }
}

/// Request a password reset token
///
/// The message is identical whether or not the email matched an account.
#[utoipa::path(
    post,
    path = "/api/forgot-password",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset requested", body = ForgotPasswordResponse),
        (status = 400, description = "Email missing", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, AppError> {
    let response = state.reset.request_reset(&request.email).await?;

    audit_log(&AuditEvent::PasswordResetRequested {
        client: ClientInfo::from_headers(&headers),
    });
    Ok(Json(response))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/api/reset-password",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or password too short", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let result = state
        .reset
        .reset_password(&request.token, &request.password)
        .await;
    record_auth_event("password_reset", result.is_ok());

    let response = result?;
    audit_log(&AuditEvent::PasswordResetCompleted {
        client: ClientInfo::from_headers(&headers),
    });
    Ok(Json(response))
}
