//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    CookiePolicy, IdentityLinkingService, IdentityProvider, PasswordHasher, PasswordResetService,
    ProviderError, SessionService, TokenCodec, YandexClient,
};
use latchkey_core::{
    AppConfig, CredentialStore, InMemoryCredentialStore, InMemoryRefreshLedger,
    RefreshTokenLedger,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
    /// Token signer/verifier shared with the access middleware
    pub codec: Arc<TokenCodec>,
    pub sessions: Arc<SessionService>,
    pub linking: Arc<IdentityLinkingService>,
    pub reset: Arc<PasswordResetService>,
    /// Refresh cookie attributes
    pub cookies: CookiePolicy,
}

impl AppState {
    /// Wire the services over the given stores
    ///
    /// `provider` is `None` when external login is not configured; the
    /// endpoint then answers `400`.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(config.tokens.clone()));
        let hasher = Arc::new(PasswordHasher::new(config.password.clone()));

        let sessions = Arc::new(SessionService::new(
            store.clone(),
            ledger,
            hasher.clone(),
            codec.clone(),
            config.bootstrap.admin_username.clone(),
        ));
        let linking = Arc::new(IdentityLinkingService::new(
            store.clone(),
            hasher.clone(),
            sessions.clone(),
            provider,
        ));
        let reset = Arc::new(PasswordResetService::new(
            store,
            hasher,
            config.reset.token_ttl_secs,
            config.expose_reset_token(),
        ));
        let cookies = CookiePolicy::new(
            config.tokens.refresh_expiration_secs,
            config.cross_site_cookies(),
        );

        Self {
            config,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
            codec,
            sessions,
            linking,
            reset,
            cookies,
        }
    }

    /// Build state with the Yandex client taken from configuration
    pub fn with_configured_provider(
        config: AppConfig,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
    ) -> Result<Self, ProviderError> {
        let provider = YandexClient::from_config(&config.yandex)?
            .map(|client| Arc::new(client) as Arc<dyn IdentityProvider>);
        if provider.is_none() {
            tracing::warn!("Yandex credentials not configured, external login disabled");
        }
        Ok(Self::new(config, store, ledger, provider))
    }

    /// State over fresh in-memory stores, without an identity provider
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryRefreshLedger::new()),
            None,
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::Environment;

    #[test]
    fn test_ready_flag() {
        let state = AppState::default();
        assert!(state.is_ready());
        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_cookie_policy_follows_environment() {
        let state = AppState::default();
        assert!(!state.cookies.cross_site);
        assert_eq!(state.cookies.max_age_secs, 2_592_000);

        let mut config = AppConfig::default();
        config.server.environment = Environment::Production;
        let state = AppState::in_memory(config);
        assert!(state.cookies.cross_site);
    }

    #[test]
    fn test_unconfigured_provider_is_disabled() {
        let state = AppState::with_configured_provider(
            AppConfig::default(),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryRefreshLedger::new()),
        );
        assert!(state.is_ok());
    }
}
