//! In-memory store implementations
//!
//! Used when no database URL is configured and throughout the test suites.
//! Uniqueness rules match the PostgreSQL schema.

use crate::store::{CredentialStore, LedgerEntry, RefreshTokenLedger, StoreError, StoreResult};
use crate::{NewUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// User records kept in a map
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
    offline: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn find_where(&self, pred: impl Fn(&User) -> bool) -> StoreResult<Option<User>> {
        self.check_online()?;
        let users = self.users.read().await;
        Ok(users.values().find(|u| pred(u)).cloned())
    }
}

/// Reject `candidate` if another record already owns one of its unique fields
fn check_unique<'a>(
    mut others: impl Iterator<Item = &'a User>,
    candidate: &User,
) -> StoreResult<()> {
    others.try_for_each(|u| {
        if u.username == candidate.username {
            return Err(StoreError::Conflict(format!("username {}", candidate.username)));
        }
        if u.email == candidate.email {
            return Err(StoreError::Conflict(format!("email {}", candidate.email)));
        }
        if candidate.external_id.is_some() && u.external_id == candidate.external_id {
            return Err(StoreError::Conflict("external id".to_string()));
        }
        Ok(())
    })
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.check_online()?;
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.username == username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.email == email).await
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.external_id.as_deref() == Some(external_id))
            .await
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        self.find_where(|u| u.reset_token_valid(token, now)).await
    }

    async fn exists(&self, username: &str) -> StoreResult<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        self.check_online()?;
        let user = user.into_user();
        let mut users = self.users.write().await;
        check_unique(users.values(), &user)?;
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> StoreResult<()> {
        self.check_online()?;
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        check_unique(users.values().filter(|u| u.id != user.id), user)?;

        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        users.insert(updated.id, updated);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        self.check_online()?;
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }
}

/// Refresh token ledger keyed by user id
#[derive(Default)]
pub struct InMemoryRefreshLedger {
    entries: RwLock<HashMap<Uuid, LedgerEntry>>,
}

impl InMemoryRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users holding a live refresh token
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenLedger for InMemoryRefreshLedger {
    async fn save(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()> {
        let entry = LedgerEntry {
            user_id,
            token_hash: token_hash.to_string(),
            updated_at: Utc::now(),
        };
        self.entries.write().await.insert(user_id, entry);
        Ok(())
    }

    async fn remove(&self, token_hash: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.token_hash != token_hash);
        Ok(entries.len() != before)
    }

    async fn find(&self, token_hash: &str) -> StoreResult<Option<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.values().find(|e| e.token_hash == token_hash).cloned())
    }
}
