//! Security audit logging for session events
//!
//! Every event is serialized to JSON and logged at INFO level with the
//! `audit` target, so it can be filtered and routed separately from
//! application logs (`RUST_LOG=audit=info`).
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Request origin attached to audit events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        username: String,
        roles: Vec<String>,
        #[serde(flatten)]
        client: ClientInfo,
    },

    RegistrationFailure {
        username: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    LoginSuccess {
        user_id: Uuid,
        username: String,
        provider: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Failed password or provider login
    LoginFailure {
        username: Option<String>,
        provider: String,
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    TokenRefresh {
        user_id: Uuid,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Refresh token missing, invalid, rotated away, or revoked
    RefreshRejected {
        reason: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    Logout {
        user_id: Option<Uuid>,
        #[serde(flatten)]
        client: ClientInfo,
    },

    PasswordResetRequested {
        #[serde(flatten)]
        client: ClientInfo,
    },

    PasswordResetCompleted {
        #[serde(flatten)]
        client: ClientInfo,
    },

    ProfileUpdated {
        user_id: Uuid,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Authenticated user lacks every required role
    AccessDenied {
        user_id: Option<Uuid>,
        required_roles: Vec<String>,
        path: String,
        #[serde(flatten)]
        client: ClientInfo,
    },

    /// Access token missing, malformed, expired, or forged
    InvalidToken {
        reason: String,
        path: String,
        #[serde(flatten)]
        client: ClientInfo,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshRejected { .. } => "Token refresh rejected",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::PasswordResetRequested { .. } => "Password reset requested",
            AuditEvent::PasswordResetCompleted { .. } => "Password reset completed",
            AuditEvent::ProfileUpdated { .. } => "Profile updated",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid token",
        }
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::ProfileUpdated { user_id, .. } => Some(*user_id),
            AuditEvent::Logout { user_id, .. } | AuditEvent::AccessDenied { user_id, .. } => {
                *user_id
            }
            _ => None,
        }
    }

    fn client(&self) -> &ClientInfo {
        match self {
            AuditEvent::RegistrationSuccess { client, .. }
            | AuditEvent::RegistrationFailure { client, .. }
            | AuditEvent::LoginSuccess { client, .. }
            | AuditEvent::LoginFailure { client, .. }
            | AuditEvent::TokenRefresh { client, .. }
            | AuditEvent::RefreshRejected { client, .. }
            | AuditEvent::Logout { client, .. }
            | AuditEvent::PasswordResetRequested { client, .. }
            | AuditEvent::PasswordResetCompleted { client, .. }
            | AuditEvent::ProfileUpdated { client, .. }
            | AuditEvent::AccessDenied { client, .. }
            | AuditEvent::InvalidToken { client, .. } => client,
        }
    }
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %Utc::now(),
        event = %event_json,
        user_id = ?event.user_id(),
        ip_address = ?event.client().ip_address,
        "{}",
        event.summary()
    );
}

/// Extract the client IP from proxy headers
///
/// Prefers the first address in `X-Forwarded-For`, then `X-Real-IP`.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first_ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
