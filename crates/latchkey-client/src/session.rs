//! Session client with silent refresh
//!
//! Every authenticated call carries the stored access token. A `401` triggers
//! at most one refresh (`GET /refresh`, authenticated by the cookie jar) and
//! one retry of the original call. When the refresh fails the stored token is
//! discarded and the original `401` is returned.
//!
//! Concurrent calls that hit `401` together share a single in-flight refresh
//! instead of each rotating the refresh token in turn.
//!
//! With a cookie file configured, remembered sessions also keep the refresh
//! cookie on disk, so a new process can refresh an expired access token.

use crate::error::ClientError;
use crate::models::{
    ForgotPasswordResponse, MessageResponse, Profile, ProfileUpdate, ProfileUpdateResponse,
    PublicUser, SessionResponse, UserInfo,
};
use crate::storage::{CookieFile, TokenStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::cookie::Jar;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type RefreshFuture = Shared<BoxFuture<'static, Result<SessionResponse, ClientError>>>;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:5000/api`
    pub base_url: String,
    /// Durable slot for remember-me tokens; memory only when unset
    pub token_file: Option<PathBuf>,
    /// Refresh cookie snapshot, written only for remembered sessions
    pub cookie_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token_file: None,
            cookie_file: None,
            timeout_secs: 30,
        }
    }
}

/// The refresh currently on the wire, tagged so a finished one can be told
/// apart from its successor
struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct RefreshSlot {
    next_generation: u64,
    current: Option<InFlight>,
}

pub struct SessionClient {
    http: Client,
    base_url: Url,
    tokens: TokenStore,
    jar: Arc<Jar>,
    cookies: Option<CookieFile>,
    refresh_slot: Mutex<RefreshSlot>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = parse_base_url(&config.base_url)?;

        let jar = Arc::new(Jar::default());
        let cookies = config.cookie_file.map(CookieFile::new);
        if let Some(file) = &cookies {
            file.restore(&jar, &base_url)?;
        }

        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let tokens = config
            .token_file
            .map(TokenStore::with_file)
            .unwrap_or_default();

        Ok(Self {
            http,
            base_url,
            tokens,
            jar,
            cookies,
            refresh_slot: Mutex::new(RefreshSlot::default()),
        })
    }

    /// Stored access token, if any
    pub async fn access_token(&self) -> Result<Option<String>, ClientError> {
        self.tokens.load().await
    }

    pub async fn is_authenticated(&self) -> Result<bool, ClientError> {
        Ok(self.tokens.load().await?.is_some())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Password login; `remember` keeps the access token across restarts
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember: bool,
    ) -> Result<UserInfo, ClientError> {
        let body = json!({"username": username, "password": password});
        self.open_session("signin", body, remember).await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<UserInfo, ClientError> {
        let body = json!({"username": username, "email": email, "password": password});
        self.open_session("registration", body, remember).await
    }

    /// Complete a Yandex ID login with the authorization code
    pub async fn login_with_yandex(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        remember: bool,
    ) -> Result<UserInfo, ClientError> {
        let body = json!({"code": code, "redirectUri": redirect_uri});
        self.open_session("auth/yandex", body, remember).await
    }

    async fn open_session(
        &self,
        path: &str,
        body: Value,
        remember: bool,
    ) -> Result<UserInfo, ClientError> {
        let response = self
            .execute(Method::POST, self.endpoint(path)?, Some(&body), None)
            .await?;
        let session: SessionResponse = decode(response).await?;

        self.store_session(&session.access_token, remember).await?;
        tracing::debug!(user = %session.user.username, remember, "Session opened");
        Ok(session.user)
    }

    /// End the session on the server and forget the access token
    ///
    /// The token is discarded even when the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = match self
            .execute(Method::GET, self.endpoint("logout")?, None, None)
            .await
        {
            Ok(response) => decode::<MessageResponse>(response).await.map(|_| ()),
            Err(e) => Err(e),
        };

        self.forget_session().await?;
        result
    }

    /// Restore a session from the refresh cookie
    ///
    /// Returns `None` (and forgets any stored token) when the server no
    /// longer accepts the cookie.
    pub async fn check_auth(&self) -> Result<Option<UserInfo>, ClientError> {
        match self.refresh().await {
            Ok(session) => Ok(Some(session.user)),
            Err(e) if e.is_unauthorized() => {
                self.forget_session().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Rotate the refresh cookie and store the new access token
    ///
    /// Joins the refresh already in flight, if there is one.
    pub async fn refresh(&self) -> Result<SessionResponse, ClientError> {
        let (generation, future) = {
            let mut slot = self.refresh_slot.lock().await;
            match &slot.current {
                Some(in_flight) => (in_flight.generation, in_flight.future.clone()),
                None => {
                    let generation = slot.next_generation;
                    slot.next_generation += 1;

                    let future =
                        refresh_request(self.http.clone(), self.endpoint("refresh")?)
                            .boxed()
                            .shared();
                    slot.current = Some(InFlight {
                        generation,
                        future: future.clone(),
                    });
                    (generation, future)
                }
            }
        };

        let outcome = future.await;

        {
            let mut slot = self.refresh_slot.lock().await;
            if slot
                .current
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                slot.current = None;
            }
        }

        let session = outcome?;
        let remember = self.tokens.is_remembered().await?;
        self.store_session(&session.access_token, remember).await?;
        Ok(session)
    }

    /// Keep the access token, and for remembered sessions the refresh cookie
    async fn store_session(&self, access_token: &str, remember: bool) -> Result<(), ClientError> {
        self.tokens.save(access_token, remember).await?;
        match &self.cookies {
            Some(file) if remember => file.save(&self.jar, &self.base_url).await,
            Some(file) => file.clear().await,
            None => Ok(()),
        }
    }

    async fn forget_session(&self) -> Result<(), ClientError> {
        self.tokens.clear().await?;
        match &self.cookies {
            Some(file) => file.clear().await,
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------

    pub async fn forgot_password(&self, email: &str) -> Result<ForgotPasswordResponse, ClientError> {
        let body = json!({"email": email});
        let response = self
            .execute(Method::POST, self.endpoint("forgot-password")?, Some(&body), None)
            .await?;
        decode(response).await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
    ) -> Result<MessageResponse, ClientError> {
        let body = json!({"token": token, "password": password});
        let response = self
            .execute(Method::POST, self.endpoint("reset-password")?, Some(&body), None)
            .await?;
        decode(response).await
    }

    // ------------------------------------------------------------------
    // Authenticated calls
    // ------------------------------------------------------------------

    pub async fn me(&self) -> Result<Profile, ClientError> {
        self.authorized(Method::GET, "me", None).await
    }

    pub async fn update_me(&self, update: &ProfileUpdate) -> Result<ProfileUpdateResponse, ClientError> {
        let body = serde_json::to_value(update).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.authorized(Method::PATCH, "me", Some(body)).await
    }

    pub async fn user(&self, username: &str) -> Result<PublicUser, ClientError> {
        let mut url = self.endpoint("user/")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(username);
        self.authorized_url(Method::GET, url, None).await
    }

    /// Every user; requires the `admin` role
    pub async fn users(&self) -> Result<Vec<PublicUser>, ClientError> {
        self.authorized(Method::GET, "users", None).await
    }

    async fn authorized<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let url = self.endpoint(path)?;
        self.authorized_url(method, url, body).await
    }

    /// Send with the access token; on `401` refresh once and retry once
    async fn authorized_url<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut token = self.tokens.load().await?;
        let mut retried = false;

        loop {
            let response = self
                .execute(method.clone(), url.clone(), body.as_ref(), token.as_deref())
                .await?;

            if response.status() != StatusCode::UNAUTHORIZED || retried {
                return decode(response).await;
            }
            retried = true;

            let original = ClientError::from_response(response).await;
            match self.renew_after_rejection(token.as_deref()).await {
                Ok(fresh) => token = Some(fresh),
                Err(e) => {
                    tracing::debug!(error = %e, "Silent refresh failed, discarding access token");
                    self.forget_session().await?;
                    return Err(original);
                }
            }
        }
    }

    /// Token to retry with after `rejected` drew a `401`
    async fn renew_after_rejection(&self, rejected: Option<&str>) -> Result<String, ClientError> {
        // Another call may have rotated the token while this one was on the wire
        if let Some(current) = self.tokens.load().await? {
            if rejected != Some(current.as_str()) {
                return Ok(current);
            }
        }
        Ok(self.refresh().await?.access_token)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, ClientError> {
        let mut request = self.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

async fn refresh_request(http: Client, url: Url) -> Result<SessionResponse, ClientError> {
    let response = http.get(url).send().await?;
    decode(response).await
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::from_response(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}

/// Parse the API root so relative joins stay under it
fn parse_base_url(base_url: &str) -> Result<Url, ClientError> {
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_joins_under_api_root() {
        let base = parse_base_url("http://localhost:5000/api").unwrap();
        assert_eq!(
            base.join("refresh").unwrap().as_str(),
            "http://localhost:5000/api/refresh"
        );

        let base = parse_base_url("http://localhost:5000/api/").unwrap();
        assert_eq!(
            base.join("auth/yandex").unwrap().as_str(),
            "http://localhost:5000/api/auth/yandex"
        );

        assert!(parse_base_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_user_path_is_escaped() {
        let client = SessionClient::new(ClientConfig::default()).unwrap();
        let mut url = client.endpoint("user/").unwrap();
        url.path_segments_mut()
            .unwrap()
            .pop_if_empty()
            .push("a b/c");
        assert_eq!(url.as_str(), "http://localhost:5000/api/user/a%20b%2Fc");
    }
}
