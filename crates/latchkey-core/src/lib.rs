//! Latchkey Core - Domain models, store traits, and shared types
//!
//! This crate defines the core abstractions used by the Latchkey session authority:
//! - User records and the login-provider tag
//! - Role constants and the bootstrap role assignment
//! - Credential store and refresh token ledger traits
//! - In-memory and PostgreSQL store implementations
//! - Configuration management

pub mod config;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::{
    AppConfig, BootstrapConfig, ConfigError, DatabaseConfig, Environment, LoggingConfig,
    PasswordConfig, ResetConfig, ServerConfig, TokenConfig, YandexConfig,
};
pub use memory::{InMemoryCredentialStore, InMemoryRefreshLedger};
pub use postgres::{PgCredentialStore, PgRefreshLedger};
pub use store::{CredentialStore, LedgerEntry, RefreshTokenLedger, StoreError, StoreResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Roles
// ============================================================================

/// Role carried by every account
pub const ROLE_USER: &str = "user";

/// Elevated role, granted only to the bootstrap account at registration
pub const ROLE_ADMIN: &str = "admin";

/// Roles assigned to a freshly registered account
///
/// The bootstrap username receives `["user", "admin"]`, everyone else `["user"]`.
pub fn default_roles(username: &str, bootstrap_username: &str) -> Vec<String> {
    if !bootstrap_username.is_empty() && username == bootstrap_username {
        vec![ROLE_USER.to_string(), ROLE_ADMIN.to_string()]
    } else {
        vec![ROLE_USER.to_string()]
    }
}

// ============================================================================
// Users
// ============================================================================

/// How the user last authenticated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginProvider {
    #[default]
    Local,
    Yandex,
}

impl LoginProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginProvider::Local => "local",
            LoginProvider::Yandex => "yandex",
        }
    }
}

impl std::fmt::Display for LoginProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoginProvider {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "yandex" => Ok(Self::Yandex),
            other => Err(StoreError::Corrupt(format!("unknown login provider: {other}"))),
        }
    }
}

/// Stored user account
///
/// Created on registration or first external login, never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Unique login name
    pub username: String,

    /// Unique email address
    pub email: String,

    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Ordered role set, always contains `user`
    pub roles: Vec<String>,

    /// Subject id issued by the external identity provider (unique when present)
    pub external_id: Option<String>,

    /// Canonical avatar URL
    pub avatar_url: Option<String>,

    pub last_login_provider: LoginProvider,

    /// Outstanding password reset token
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,

    #[serde(skip_serializing)]
    pub reset_token_expires: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Check whether the user holds a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check whether the stored reset token matches and is still live at `now`
    pub fn reset_token_valid(&self, token: &str, now: DateTime<Utc>) -> bool {
        match (&self.reset_token, self.reset_token_expires) {
            (Some(stored), Some(expires)) => stored == token && expires > now,
            _ => false,
        }
    }

    /// Drop the reset token and its expiry
    pub fn clear_reset_token(&mut self) {
        self.reset_token = None;
        self.reset_token_expires = None;
    }
}

/// Fields required to create a user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub last_login_provider: LoginProvider,
}

impl NewUser {
    /// A locally registered account
    pub fn local(username: String, email: String, password_hash: String, roles: Vec<String>) -> Self {
        Self {
            username,
            email,
            password_hash,
            roles,
            external_id: None,
            avatar_url: None,
            last_login_provider: LoginProvider::Local,
        }
    }

    /// Materialize the record with a fresh id and timestamps
    pub fn into_user(self) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            roles: self.roles,
            external_id: self.external_id,
            avatar_url: self.avatar_url,
            last_login_provider: self.last_login_provider,
            reset_token: None,
            reset_token_expires: None,
            created_at: now,
            updated_at: now,
        }
    }
}
