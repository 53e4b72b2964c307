//! Access and role middleware for protected routes
//!
//! `auth_middleware` verifies the bearer access token with the shared
//! [`TokenCodec`](super::jwt::TokenCodec) and places an [`AuthenticatedUser`]
//! in the request extensions. Neither layer touches the credential store or
//! the refresh ledger: access tokens are trusted until they expire.
use super::jwt::{Claims, JwtError, TokenKind};
use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Authenticated identity extracted from an access token
///
/// Handlers read it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    /// JWT ID of the presented token
    pub jti: String,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// True when the user holds at least one of `roles`
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = JwtError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: claims.user_id()?,
            username: claims.username,
            email: claims.email,
            roles: claims.roles,
            jti: claims.jti,
        })
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken(_) => AppError::Unauthorized(err.to_string()),
            AuthError::InsufficientPermissions => AppError::Forbidden(err.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

fn bearer_token(request: &Request<Body>) -> Result<&str, AuthError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Authentication middleware that requires a valid access token
///
/// # Usage
///
/// ```ignore
/// let protected = Router::new()
///     .route("/me", get(users::me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let verified = bearer_token(&request).and_then(|token| {
        let claims = state.codec.verify(token, TokenKind::Access)?;
        Ok(AuthenticatedUser::try_from(claims)?)
    });

    let user = match verified {
        Ok(user) => user,
        Err(e) => {
            // Anonymous requests are not audited
            if !matches!(e, AuthError::MissingAuthHeader) {
                audit_log(&AuditEvent::InvalidToken {
                    reason: e.to_string(),
                    path: request.uri().path().to_string(),
                    client: ClientInfo::from_headers(request.headers()),
                });
            }
            return Err(e);
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Check an identity against a required-role list
///
/// An empty list places no restriction. Otherwise the identity must be
/// present and hold at least one of the listed roles.
pub fn authorize(user: Option<&AuthenticatedUser>, required_roles: &[&str]) -> Result<(), AuthError> {
    if required_roles.is_empty() {
        return Ok(());
    }

    match user {
        Some(user) if user.has_any_role(required_roles) => Ok(()),
        _ => Err(AuthError::InsufficientPermissions),
    }
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must run after [`auth_middleware`].
///
/// # Example
///
/// ```ignore
/// let admin = Router::new()
///     .route("/users", get(users::list_users_handler))
///     .route_layer(middleware::from_fn(require_any_role(&["admin"])))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub fn require_any_role(
    required_roles: &'static [&'static str],
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let user = request.extensions().get::<AuthenticatedUser>();

            if let Err(e) = authorize(user, required_roles) {
                audit_log(&AuditEvent::AccessDenied {
                    user_id: user.map(|u| u.user_id),
                    required_roles: required_roles.iter().map(|r| r.to_string()).collect(),
                    path: request.uri().path().to_string(),
                    client: ClientInfo::from_headers(request.headers()),
                });
                return Err(e);
            }

            Ok(next.run(request).await)
        })
    }
}
