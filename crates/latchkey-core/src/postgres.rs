//! PostgreSQL store implementations
//!
//! User records and the refresh token ledger on SQLx. `migrate` creates the
//! schema idempotently so a fresh database is usable on first start.

use crate::store::{CredentialStore, LedgerEntry, RefreshTokenLedger, StoreError, StoreResult};
use crate::{LoginProvider, NewUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        roles TEXT[] NOT NULL DEFAULT ARRAY['user'],
        external_id TEXT UNIQUE,
        avatar_url TEXT,
        last_login_provider TEXT NOT NULL DEFAULT 'local',
        reset_token TEXT,
        reset_token_expires TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS users_reset_token_idx ON users (reset_token)",
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        user_id UUID PRIMARY KEY REFERENCES users (id),
        token_hash TEXT NOT NULL UNIQUE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

const USER_COLUMNS: &str = "id, username, email, password_hash, roles, external_id, avatar_url, \
     last_login_provider, reset_token, reset_token_expires, created_at, updated_at";

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("PostgreSQL connection failed: {e}")))
}

/// Create tables and indexes if they do not exist
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(map_sqlx)?;
    }
    tracing::info!("Database schema is up to date");
    Ok(())
}

/// Translate driver errors; unique violations become `Conflict`
fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
        }
    }
    StoreError::Unavailable(err.to_string())
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    roles: Vec<String>,
    external_id: Option<String>,
    avatar_url: Option<String>,
    last_login_provider: String,
    reset_token: Option<String>,
    reset_token_expires: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            roles: row.roles,
            external_id: row.external_id,
            avatar_url: row.avatar_url,
            last_login_provider: row.last_login_provider.parse::<LoginProvider>()?,
            reset_token: row.reset_token,
            reset_token_expires: row.reset_token_expires,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL credential store
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause} = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.fetch_one_where("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        self.fetch_one_where("external_id", external_id).await
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1 AND reset_token_expires > $2"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(User::try_from)
            .transpose()
    }

    async fn exists(&self, username: &str) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let user = user.into_user();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, roles, external_id, avatar_url,
                               last_login_provider, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(&user.external_id)
        .bind(&user.avatar_url)
        .bind(user.last_login_provider.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(user)
    }

    async fn save(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                username = $2, email = $3, password_hash = $4, roles = $5, external_id = $6,
                avatar_url = $7, last_login_provider = $8, reset_token = $9,
                reset_token_expires = $10, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(&user.external_id)
        .bind(&user.avatar_url)
        .bind(user.last_login_provider.as_str())
        .bind(&user.reset_token)
        .bind(user.reset_token_expires)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(User::try_from)
            .collect()
    }
}

/// Refresh token row from database
#[derive(Debug, FromRow)]
struct LedgerRow {
    user_id: Uuid,
    token_hash: String,
    updated_at: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            user_id: row.user_id,
            token_hash: row.token_hash,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL refresh token ledger
#[derive(Clone)]
pub struct PgRefreshLedger {
    pool: PgPool,
}

impl PgRefreshLedger {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshLedger {
    async fn save(&self, user_id: Uuid, token_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE
                SET token_hash = EXCLUDED.token_hash, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn remove(&self, token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, token_hash: &str) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT user_id, token_hash, updated_at FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(row.map(LedgerEntry::from))
    }
}
