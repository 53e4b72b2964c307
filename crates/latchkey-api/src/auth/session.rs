//! Session service: registration, login, refresh rotation, logout
//!
//! Every successful authentication path ends in [`SessionService::issue_session`],
//! which signs a fresh access/refresh pair and overwrites the user's ledger
//! entry with the digest of the new refresh token. A refresh token is therefore
//! valid only while it is the most recent one issued to its user.

use super::jwt::{TokenCodec, TokenKind};
use super::models::{
    AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest, UserInfo, UserProfile,
    UserPublic,
};
use super::password::{validate_password_length, PasswordHasher};
use crate::error::AppError;
use latchkey_core::{
    default_roles, CredentialStore, LoginProvider, NewUser, RefreshTokenLedger, StoreError, User,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// SHA-256 hex digest under which a refresh token is kept in the ledger
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Session lifecycle operations
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
    hasher: Arc<PasswordHasher>,
    codec: Arc<TokenCodec>,
    bootstrap_username: String,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        hasher: Arc<PasswordHasher>,
        codec: Arc<TokenCodec>,
        bootstrap_username: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            hasher,
            codec,
            bootstrap_username: bootstrap_username.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Register a new local account and open a session for it
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AppError> {
        let request = RegisterRequest {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_string(),
            password: request.password,
        };
        request.validate()?;

        if self.store.exists(&request.username).await? {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }
        if self.store.find_by_email(&request.email).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let password_hash = self.hasher.hash(&request.password)?;
        let roles = default_roles(&request.username, &self.bootstrap_username);

        // A concurrent registration can still win the race; the store reports it as Conflict
        let user = self
            .store
            .create(NewUser::local(
                request.username,
                request.email,
                password_hash,
                roles,
            ))
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        self.issue_session(&user).await
    }

    /// Authenticate with username and password
    ///
    /// Unknown usernames and wrong passwords fail identically.
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AppError> {
        let Some(mut user) = self.store.find_by_username(request.username.trim()).await? else {
            self.hasher.verify_absent(&request.password);
            return Err(AppError::InvalidCredentials);
        };

        if !self.hasher.verify(&request.password, &user.password_hash)? {
            return Err(AppError::InvalidCredentials);
        }

        if user.last_login_provider != LoginProvider::Local {
            user.last_login_provider = LoginProvider::Local;
            self.store.save(&user).await?;
        }

        self.issue_session(&user).await
    }

    /// Exchange a refresh token for a new pair, consuming the old token
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<AuthResponse, AppError> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Refresh token missing".to_string()))?;

        let claims = self.codec.verify(token, TokenKind::Refresh)?;
        let user_id = claims.user_id()?;
        let token_hash = hash_token(token);

        let entry = self
            .ledger
            .find(&token_hash)
            .await?
            .filter(|entry| entry.user_id == user_id)
            .ok_or_else(|| AppError::Unauthorized("Refresh token revoked".to_string()))?;

        // Removing the entry claims it: of two concurrent refreshes with the same token only one wins
        if !self.ledger.remove(&entry.token_hash).await? {
            return Err(AppError::Unauthorized("Refresh token revoked".to_string()));
        }

        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

        self.issue_session(&user).await
    }

    /// Revoke the given refresh token; missing or unknown tokens are not an error
    ///
    /// Returns the owner of the revoked token, if any.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<Option<Uuid>, AppError> {
        let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let token_hash = hash_token(token);
        let owner = self.ledger.find(&token_hash).await?.map(|e| e.user_id);
        self.ledger.remove(&token_hash).await?;
        Ok(owner)
    }

    /// Sign a fresh pair for `user` and make its refresh token the current one
    pub async fn issue_session(&self, user: &User) -> Result<AuthResponse, AppError> {
        let pair = self.codec.issue_pair(user)?;
        self.ledger
            .save(user.id, &hash_token(&pair.refresh_token))
            .await?;

        Ok(AuthResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: UserInfo::from(user),
        })
    }

    /// Profile of the calling user
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;
        Ok(UserProfile::from(&user))
    }

    /// Public view of any user
    pub async fn get_public(&self, username: &str) -> Result<UserPublic, AppError> {
        let user = self
            .store
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;
        Ok(UserPublic::from(&user))
    }

    /// Change username, email, or password of the calling user
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        request: UpdateProfileRequest,
    ) -> Result<UserProfile, AppError> {
        let request = UpdateProfileRequest {
            username: request.username.map(|u| u.trim().to_string()),
            email: request.email.map(|e| e.trim().to_string()),
            password: request.password,
        };
        request.validate()?;

        let mut user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        if let Some(username) = request.username.filter(|u| *u != user.username) {
            if self.store.exists(&username).await? {
                return Err(AppError::Conflict("Username already taken".to_string()));
            }
            user.username = username;
        }

        if let Some(email) = request.email.filter(|e| *e != user.email) {
            if self.store.find_by_email(&email).await?.is_some() {
                return Err(AppError::Conflict("Email already registered".to_string()));
            }
            user.email = email;
        }

        if let Some(password) = request.password {
            validate_password_length(&password).map_err(AppError::BadRequest)?;
            user.password_hash = self.hasher.hash(&password)?;
        }

        self.store.save(&user).await.map_err(|e| match e {
            StoreError::Conflict(_) => AppError::Conflict("Username or email already taken".into()),
            other => other.into(),
        })?;

        tracing::info!(user_id = %user.id, "Profile updated");
        Ok(UserProfile::from(&user))
    }

    /// Every user, oldest first
    pub async fn list_users(&self) -> Result<Vec<UserPublic>, AppError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(UserPublic::from)
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use latchkey_core::{
        InMemoryCredentialStore, InMemoryRefreshLedger, PasswordConfig, TokenConfig,
    };

    pub(crate) struct Fixture {
        pub store: Arc<InMemoryCredentialStore>,
        pub ledger: Arc<InMemoryRefreshLedger>,
        pub sessions: Arc<SessionService>,
    }

    pub(crate) fn fixture() -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        let ledger = Arc::new(InMemoryRefreshLedger::new());
        let hasher = Arc::new(PasswordHasher::new(PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }));
        let codec = Arc::new(TokenCodec::new(TokenConfig::default()));
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            ledger.clone(),
            hasher,
            codec,
            "admin",
        ));
        Fixture {
            store,
            ledger,
            sessions,
        }
    }

    fn register_request(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "secret1".to_string(),
        }
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_then_login_same_user() {
        let f = fixture();
        let registered = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();
        assert_eq!(registered.user.roles, vec!["user"]);

        let logged_in = f
            .sessions
            .login(login_request("alice", "secret1"))
            .await
            .unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
        assert_ne!(logged_in.refresh_token, registered.refresh_token);
    }

    #[tokio::test]
    async fn test_bootstrap_username_gets_admin() {
        let f = fixture();
        let admin = f
            .sessions
            .register(register_request("admin", "admin@x.com"))
            .await
            .unwrap();
        assert_eq!(admin.user.roles, vec!["user", "admin"]);
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let f = fixture();
        f.sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let dup_name = f
            .sessions
            .register(register_request("alice", "other@x.com"))
            .await;
        assert!(matches!(dup_name, Err(AppError::Conflict(_))));

        let dup_email = f
            .sessions
            .register(register_request("bob", "alice@x.com"))
            .await;
        assert!(matches!(dup_email, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let f = fixture();
        f.sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let wrong_password = f.sessions.login(login_request("alice", "nope")).await;
        let unknown_user = f.sessions.login(login_request("mallory", "secret1")).await;

        assert!(matches!(wrong_password, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown_user, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_unknown_user_costs_a_password_check() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let hasher = Arc::new(PasswordHasher::new(PasswordConfig {
            memory_cost: 8192,
            time_cost: 2,
            parallelism: 1,
        }));
        let sessions = SessionService::new(
            store,
            Arc::new(InMemoryRefreshLedger::new()),
            hasher,
            Arc::new(TokenCodec::new(TokenConfig::default())),
            "admin",
        );
        sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let wrong_password = sessions.login(login_request("alice", "nope")).await;
        let wrong_password_time = started.elapsed();

        let started = std::time::Instant::now();
        let unknown_user = sessions.login(login_request("mallory", "nope")).await;
        let unknown_user_time = started.elapsed();

        assert!(matches!(wrong_password, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown_user, Err(AppError::InvalidCredentials)));
        // Same Argon2 work on both paths; the margin absorbs scheduler noise
        assert!(
            unknown_user_time * 4 >= wrong_password_time,
            "unknown user rejected in {unknown_user_time:?}, wrong password in {wrong_password_time:?}"
        );
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let f = fixture();
        let session = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let rotated = f
            .sessions
            .refresh(Some(&session.refresh_token))
            .await
            .unwrap();
        assert_eq!(rotated.user.id, session.user.id);

        let reused = f.sessions.refresh(Some(&session.refresh_token)).await;
        assert!(matches!(reused, Err(AppError::Unauthorized(_))));

        // The rotated token is still good
        assert!(f.sessions.refresh(Some(&rotated.refresh_token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_new_login_invalidates_previous_refresh_token() {
        let f = fixture();
        let first = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();
        f.sessions
            .login(login_request("alice", "secret1"))
            .await
            .unwrap();

        let result = f.sessions.refresh(Some(&first.refresh_token)).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let f = fixture();
        let session = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let result = f.sessions.refresh(Some(&session.access_token)).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_logout_then_refresh_fails() {
        let f = fixture();
        let session = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let owner = f
            .sessions
            .logout(Some(&session.refresh_token))
            .await
            .unwrap();
        assert_eq!(owner, Some(session.user.id));
        assert!(f.ledger.is_empty().await);

        let result = f.sessions.refresh(Some(&session.refresh_token)).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));

        // Idempotent, and an absent cookie is fine
        assert_eq!(
            f.sessions.logout(Some(&session.refresh_token)).await.unwrap(),
            None
        );
        assert_eq!(f.sessions.logout(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_leaves_one_valid_token() {
        let f = fixture();
        let session = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();

        let token = session.refresh_token.clone();
        let (a, b) = tokio::join!(
            f.sessions.refresh(Some(&token)),
            f.sessions.refresh(Some(&token))
        );

        let winners: Vec<AuthResponse> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(f.ledger.len().await, 1);
        assert!(f
            .sessions
            .refresh(Some(&winners[0].refresh_token))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_for_vanished_user() {
        let f = fixture();
        let user = f
            .store
            .create(NewUser::local(
                "ghost".into(),
                "ghost@x.com".into(),
                "hash".into(),
                vec!["user".into()],
            ))
            .await
            .unwrap();
        let session = f.sessions.issue_session(&user).await.unwrap();

        // Re-point the ledger entry at a user id that has no record
        let codec = TokenCodec::new(TokenConfig::default());
        let mut phantom = user.clone();
        phantom.id = Uuid::new_v4();
        let orphan = codec.sign(&phantom, TokenKind::Refresh).unwrap();
        f.ledger.save(phantom.id, &hash_token(&orphan)).await.unwrap();

        assert!(matches!(
            f.sessions.refresh(Some(&orphan)).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(f.sessions.refresh(Some(&session.refresh_token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_outage_is_reported() {
        let f = fixture();
        f.store.set_offline(true);
        let result = f.sessions.login(login_request("alice", "secret1")).await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_update_profile() {
        let f = fixture();
        let alice = f
            .sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();
        f.sessions
            .register(register_request("bob", "bob@x.com"))
            .await
            .unwrap();

        let taken = f
            .sessions
            .update_profile(
                alice.user.id,
                UpdateProfileRequest {
                    username: Some(" bob ".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(AppError::Conflict(_))));

        let short = f
            .sessions
            .update_profile(
                alice.user.id,
                UpdateProfileRequest {
                    password: Some("123".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(short, Err(AppError::BadRequest(_))));

        let updated = f
            .sessions
            .update_profile(
                alice.user.id,
                UpdateProfileRequest {
                    username: Some("  alicia ".to_string()),
                    password: Some("newsecret".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.username, "alicia");

        assert!(f
            .sessions
            .login(login_request("alicia", "newsecret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_public_lookup_and_listing() {
        let f = fixture();
        f.sessions
            .register(register_request("alice", "alice@x.com"))
            .await
            .unwrap();
        f.sessions
            .register(register_request("bob", "bob@x.com"))
            .await
            .unwrap();

        assert_eq!(
            f.sessions.get_public("bob").await.unwrap().username,
            "bob"
        );
        assert!(matches!(
            f.sessions.get_public("carol").await,
            Err(AppError::NotFound(_))
        ));

        let users = f.sessions.list_users().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
