//! Persistence contracts for user records and refresh tokens
//!
//! Services depend on these traits only, so the backing store can be swapped
//! between PostgreSQL and the in-memory implementation used in development and tests.

use crate::{NewUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// User record persistence
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>>;

    /// Find the user holding exactly this reset token with an expiry strictly after `now`
    async fn find_by_reset_token(&self, token: &str, now: DateTime<Utc>)
        -> StoreResult<Option<User>>;

    /// Check whether a username is taken
    async fn exists(&self, username: &str) -> StoreResult<bool>;

    /// Insert a new user; fails with `Conflict` on a duplicate username, email, or external id
    async fn create(&self, user: NewUser) -> StoreResult<User>;

    /// Persist every field of an existing user
    async fn save(&self, user: &User) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<User>>;
}

/// Current refresh token of a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    /// SHA-256 digest of the refresh token
    pub token_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// One live refresh token per user
///
/// `save` overwrites whatever entry the user had, so a new login or refresh
/// invalidates every other outstanding refresh token of that user.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Upsert the user's entry
    async fn save(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()>;

    /// Remove the entry holding this digest; returns whether one existed
    async fn remove(&self, token_hash: &str) -> StoreResult<bool>;

    async fn find(&self, token_hash: &str) -> StoreResult<Option<LedgerEntry>>;
}
