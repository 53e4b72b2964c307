//! Third-party identity linking (Yandex ID)
//!
//! An authorization code is exchanged for a provider access token, the
//! provider profile is fetched, and the profile is resolved to a local user:
//! first by linked external id, then by the verified primary email, otherwise
//! a new account is created. The resolved user then gets a regular session.

use super::models::AuthResponse;
use super::password::PasswordHasher;
use super::session::SessionService;
use crate::error::AppError;
use async_trait::async_trait;
use latchkey_core::{
    CredentialStore, LoginProvider, NewUser, StoreError, User, YandexConfig, ROLE_USER,
};
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const YANDEX_AVATAR_BASE: &str = "https://avatars.mds.yandex.net/get-yapic";
const DEFAULT_AVATAR_SIZE: &str = "islands-200";

/// Identity provider errors; all surface to the caller as `400 Bad Request`
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authorization code is missing")]
    MissingCode,

    #[error("Yandex ID integration is not configured")]
    NotConfigured,

    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),

    #[error("Provider returned no access token")]
    MissingAccessToken,

    #[error("Failed to fetch provider profile: {0}")]
    Profile(String),

    #[error("Provider profile has no user id")]
    MissingSubject,
}

/// Profile fields returned by `login.yandex.ru/info`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderProfile {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub uid: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub default_email: Option<String>,
    /// Yandex may send `null` here as well as omit it
    #[serde(default)]
    pub emails: Option<Vec<String>>,
    #[serde(default)]
    pub default_avatar_id: Option<String>,
}

impl ProviderProfile {
    /// Provider subject id: `id`, falling back to `uid`
    pub fn subject(&self) -> Option<&str> {
        [&self.id, &self.uid]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Verified primary email: `default_email`, else the first of `emails`
    pub fn primary_email(&self) -> Option<&str> {
        self.default_email
            .iter()
            .chain(self.emails.iter().flatten())
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

/// OAuth-style identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for a provider access token
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<String, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error_description: Option<String>,
    error: Option<String>,
}

/// Yandex ID client over reqwest
pub struct YandexClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    info_url: String,
}

impl YandexClient {
    /// Build a client; `None` when the client id or secret is not configured
    pub fn from_config(config: &YandexConfig) -> Result<Option<Self>, ProviderError> {
        let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret)
        else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        Ok(Some(Self {
            http,
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            token_url: config.token_url.clone(),
            info_url: config.info_url.clone(),
        }))
    }
}

/// Best description of a failed provider response
async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ProviderErrorBody>().await {
        Ok(body) => body
            .error_description
            .or(body.error)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl IdentityProvider for YandexClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(uri) = redirect_uri.filter(|u| !u.is_empty()) {
            form.push(("redirect_uri", uri));
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Exchange(describe_failure(response).await));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::MissingAccessToken)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .http
            .get(&self.info_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("OAuth {access_token}"),
            )
            .send()
            .await
            .map_err(|e| ProviderError::Profile(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Profile(describe_failure(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Profile(e.to_string()))
    }
}

/// Canonicalize a Yandex avatar reference
///
/// Accepts a bare avatar id or a URL. Yandex `get-yapic` URLs are rebuilt on
/// the canonical host with `islands-retina-*` sizes mapped to `islands-*`;
/// anything else, including unparseable input, is returned as given.
pub fn normalize_avatar_url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let lower = value.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        value.to_string()
    } else {
        format!("{YANDEX_AVATAR_BASE}/{value}/{DEFAULT_AVATAR_SIZE}")
    };

    let Ok(parsed) = Url::parse(&candidate) else {
        return Some(candidate);
    };

    let is_yandex = parsed.host_str().is_some_and(|h| h.contains("yandex"));
    if !is_yandex || !parsed.path().contains("/get-yapic/") {
        return Some(candidate);
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let Some(pos) = segments.iter().position(|s| *s == "get-yapic") else {
        return Some(candidate);
    };

    let (group, rest) = match &segments[pos + 1..] {
        [group, rest @ ..] if !rest.is_empty() => (*group, rest),
        _ => return Some(candidate),
    };

    let (identifier, size) = match rest {
        [identifier] => (identifier.to_string(), DEFAULT_AVATAR_SIZE.to_string()),
        [identifier @ .., size] => {
            let size = match size.strip_prefix("islands-retina-") {
                Some(dim) => format!("islands-{dim}"),
                _ => size.to_string(),
            };
            (identifier.join("/"), size)
        }
        [] => return Some(candidate),
    };

    Some(format!("{YANDEX_AVATAR_BASE}/{group}/{identifier}/{size}"))
}

/// Local username base for a provider profile
fn username_base(profile: &ProviderProfile, subject: &str) -> String {
    let strip = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase()
    };

    [&profile.login, &profile.display_name]
        .into_iter()
        .flatten()
        .map(|s| strip(s.as_str()))
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| strip(&format!("yandex_{subject}")))
}

/// Password nobody knows, for accounts created through the provider
fn random_password() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolves provider identities to local users
pub struct IdentityLinkingService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<PasswordHasher>,
    sessions: Arc<SessionService>,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl IdentityLinkingService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<PasswordHasher>,
        sessions: Arc<SessionService>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self {
            store,
            hasher,
            sessions,
            provider,
        }
    }

    /// Log in with a Yandex ID authorization code
    pub async fn login(
        &self,
        code: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<AuthResponse, AppError> {
        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ProviderError::MissingCode)?;
        let provider = self.provider.as_ref().ok_or(ProviderError::NotConfigured)?;

        let access_token = provider.exchange_code(code, redirect_uri).await?;
        let profile = provider.fetch_profile(&access_token).await?;

        let user = self.resolve(&profile).await?;
        tracing::info!(user_id = %user.id, provider = "yandex", "External login");
        self.sessions.issue_session(&user).await
    }

    /// Find or create the local user for a provider profile
    pub async fn resolve(&self, profile: &ProviderProfile) -> Result<User, AppError> {
        let subject = profile.subject().ok_or(ProviderError::MissingSubject)?;
        let primary_email = profile.primary_email();

        let mut existing = self.store.find_by_external_id(subject).await?;
        if existing.is_none() {
            if let Some(email) = primary_email {
                existing = self.store.find_by_email(email).await?;
            }
        }

        let avatar = profile
            .default_avatar_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| existing.as_ref().and_then(|u| u.avatar_url.as_deref()))
            .and_then(normalize_avatar_url);

        match existing {
            Some(user) => self.merge(user, subject, avatar).await,
            None => self.create(profile, subject, primary_email, avatar).await,
        }
    }

    async fn merge(
        &self,
        mut user: User,
        subject: &str,
        avatar: Option<String>,
    ) -> Result<User, AppError> {
        let mut changed = false;

        if user.external_id.is_none() {
            user.external_id = Some(subject.to_string());
            changed = true;
        }
        if avatar.is_some() && user.avatar_url != avatar {
            user.avatar_url = avatar;
            changed = true;
        }
        if user.last_login_provider != LoginProvider::Yandex {
            user.last_login_provider = LoginProvider::Yandex;
            changed = true;
        }

        if changed {
            self.store.save(&user).await?;
            tracing::debug!(user_id = %user.id, "Linked provider identity");
        }
        Ok(user)
    }

    async fn create(
        &self,
        profile: &ProviderProfile,
        subject: &str,
        primary_email: Option<&str>,
        avatar: Option<String>,
    ) -> Result<User, AppError> {
        let base = username_base(profile, subject);
        let mut username = base.clone();
        let mut suffix = 1;
        while self.store.exists(&username).await? {
            username = format!("{base}_{suffix}");
            suffix += 1;
        }

        let email = primary_email
            .map(str::to_string)
            .unwrap_or_else(|| format!("{subject}@yandex.local"));

        let new_user = NewUser {
            username,
            email,
            password_hash: self.hasher.hash(&random_password())?,
            roles: vec![ROLE_USER.to_string()],
            external_id: Some(subject.to_string()),
            avatar_url: avatar,
            last_login_provider: LoginProvider::Yandex,
        };

        self.store.create(new_user).await.map_err(|e| match e {
            StoreError::Conflict(_) => {
                AppError::Conflict("Account for this identity already exists".to_string())
            }
            other => other.into(),
        })
    }
}
