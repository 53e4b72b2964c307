//! User profile handlers
//!
//! All routes here sit behind the access middleware; `/users` additionally
//! requires the `admin` role.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::{
    AuthenticatedUser, UpdateProfileRequest, UpdateProfileResponse, UserProfile, UserPublic,
};
use crate::error::AppError;
use crate::extract::JsonBody;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use std::sync::Arc;

/// Get the calling user's profile
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "users",
    responses(
        (status = 200, description = "Current user profile", body = UserProfile),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(state.sessions.get_profile(user.user_id).await?))
}

/// Update the calling user's username, email, or password
///
/// Issued tokens keep their old claims until they are refreshed.
#[utoipa::path(
    patch,
    path = "/api/me",
    tag = "users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UpdateProfileResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 409, description = "Username or email taken", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<UpdateProfileRequest>,
) -> Result<Json<UpdateProfileResponse>, AppError> {
    let profile = state.sessions.update_profile(user.user_id, request).await?;

    audit_log(&AuditEvent::ProfileUpdated {
        user_id: profile.id,
        client: ClientInfo::from_headers(&headers),
    });

    Ok(Json(UpdateProfileResponse {
        message: "Profile updated".to_string(),
        user: profile,
    }))
}

/// Public fields of a user by username
#[utoipa::path(
    get,
    path = "/api/user/{username}",
    tag = "users",
    params(
        ("username" = String, Path, description = "Login name")
    ),
    responses(
        (status = 200, description = "Public user fields", body = UserPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<UserPublic>, AppError> {
    Ok(Json(state.sessions.get_public(&username).await?))
}

/// List every user (admin only)
#[utoipa::path(
    get,
    path = "/api/users",
    tag = "users",
    responses(
        (status = 200, description = "All users", body = Vec<UserPublic>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserPublic>>, AppError> {
    Ok(Json(state.sessions.list_users().await?))
}
