//! Access token storage with a remember-me preference
//!
//! Two slots: a process-lifetime memory slot and an optional durable file
//! slot that survives restarts. Saving into one slot clears the other, so a
//! token is never held in both.
//!
//! The refresh token lives in the HTTP client's cookie jar. [`CookieFile`]
//! snapshots that jar for remembered sessions so a later process can still
//! refresh.

use crate::error::ClientError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

pub struct TokenStore {
    memory: RwLock<Option<String>>,
    durable: Option<PathBuf>,
}

impl TokenStore {
    /// Memory-only storage; remember-me saves fall back to memory
    pub fn in_memory() -> Self {
        Self {
            memory: RwLock::new(None),
            durable: None,
        }
    }

    /// Storage with a durable slot at `path`
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            memory: RwLock::new(None),
            durable: Some(path.into()),
        }
    }

    pub fn durable_path(&self) -> Option<&Path> {
        self.durable.as_deref()
    }

    /// Current access token, memory slot first
    pub async fn load(&self) -> Result<Option<String>, ClientError> {
        if let Some(token) = self.memory.read().await.clone() {
            return Ok(Some(token));
        }
        self.load_durable().await
    }

    /// Whether the durable slot holds a token
    pub async fn is_remembered(&self) -> Result<bool, ClientError> {
        Ok(self.load_durable().await?.is_some())
    }

    async fn load_durable(&self) -> Result<Option<String>, ClientError> {
        let Some(path) = &self.durable else {
            return Ok(None);
        };

        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `token` in the durable slot when `remember` is set, else in memory
    pub async fn save(&self, token: &str, remember: bool) -> Result<(), ClientError> {
        match (&self.durable, remember) {
            (Some(path), true) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, token).await?;
                *self.memory.write().await = None;
            }
            (durable, _) => {
                if durable.is_none() && remember {
                    tracing::debug!("No durable token slot configured, keeping token in memory");
                }
                *self.memory.write().await = Some(token.to_string());
                self.remove_durable().await?;
            }
        }
        Ok(())
    }

    /// Drop the token from both slots
    pub async fn clear(&self) -> Result<(), ClientError> {
        *self.memory.write().await = None;
        self.remove_durable().await
    }

    async fn remove_durable(&self) -> Result<(), ClientError> {
        let Some(path) = &self.durable else {
            return Ok(());
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// On-disk snapshot of the cookies the API has set for `url`
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seed `jar` with the saved cookies; a missing file is an empty snapshot
    pub fn restore(&self, jar: &Jar, url: &Url) -> Result<(), ClientError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for pair in contents.trim().split(';').map(str::trim) {
            if pair.contains('=') {
                jar.add_cookie_str(&format!("{pair}; Path=/"), url);
            }
        }
        Ok(())
    }

    /// Write the jar's current cookies for `url`, or remove the file when there are none
    pub async fn save(&self, jar: &Jar, url: &Url) -> Result<(), ClientError> {
        let header = jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string));

        match header {
            Some(cookies) if !cookies.is_empty() => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&self.path, cookies).await?;
                Ok(())
            }
            _ => self.clear().await,
        }
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_only() {
        let store = TokenStore::in_memory();
        assert!(store.durable_path().is_none());
        assert_eq!(store.load().await.unwrap(), None);

        store.save("abc", true).await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("abc"));
        assert!(!store.is_remembered().await.unwrap());

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remembered_token_survives_new_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("token");

        let store = TokenStore::with_file(&path);
        assert_eq!(store.durable_path(), Some(path.as_path()));
        store.save("durable-token", true).await.unwrap();
        assert!(path.exists());

        // A fresh store (new process) sees the durable token
        let reopened = TokenStore::with_file(&path);
        assert_eq!(
            reopened.load().await.unwrap().as_deref(),
            Some("durable-token")
        );
        assert!(reopened.is_remembered().await.unwrap());
    }

    #[tokio::test]
    async fn test_saving_in_one_slot_clears_the_other() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        let store = TokenStore::with_file(&path);

        store.save("remembered", true).await.unwrap();
        store.save("session-only", false).await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.load().await.unwrap().as_deref(), Some("session-only"));

        store.save("remembered-again", true).await.unwrap();
        assert!(path.exists());
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some("remembered-again")
        );

        // Memory slot was cleared, so a new store sees the same token
        let reopened = TokenStore::with_file(&path);
        assert_eq!(
            reopened.load().await.unwrap().as_deref(),
            Some("remembered-again")
        );
    }

    #[tokio::test]
    async fn test_cookie_file_round_trips_jar() {
        let dir = TempDir::new().unwrap();
        let file = CookieFile::new(dir.path().join("cookies"));
        let url = Url::parse("http://localhost:5000/api/").unwrap();

        let jar = Jar::default();
        jar.add_cookie_str("refreshToken=r1; Path=/; HttpOnly; SameSite=Lax", &url);
        file.save(&jar, &url).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "refreshToken=r1"
        );

        let restored = Jar::default();
        file.restore(&restored, &url).unwrap();
        let header = restored.cookies(&url).unwrap();
        assert_eq!(header.to_str().unwrap(), "refreshToken=r1");

        // An empty jar removes the snapshot
        file.save(&Jar::default(), &url).await.unwrap();
        assert!(!file.path().exists());
        file.restore(&Jar::default(), &url).unwrap();
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        let store = TokenStore::with_file(&path);

        store.save("t", true).await.unwrap();
        store.clear().await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.load().await.unwrap(), None);

        // Clearing twice is fine
        store.clear().await.unwrap();
    }
}
