//! Latchkey Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Access/refresh token signing
    pub tokens: TokenConfig,

    /// Argon2 cost parameters
    pub password: PasswordConfig,

    /// Password reset lifecycle
    pub reset: ResetConfig,

    /// Yandex ID integration
    pub yandex: YandexConfig,

    /// Bootstrap account
    pub bootstrap: BootstrapConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    /// Whether the deployment is production
    pub fn is_production(&self) -> bool {
        self.server.environment == Environment::Production
    }

    /// Refresh cookies must survive cross-site requests in production
    pub fn cross_site_cookies(&self) -> bool {
        self.server.cross_site_cookies.unwrap_or_else(|| self.is_production())
    }

    /// Reset tokens are echoed back only outside production
    pub fn expose_reset_token(&self) -> bool {
        self.reset.expose_token.unwrap_or_else(|| !self.is_production())
    }

    /// Reject configurations that are unsafe to run in production
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.access_secret == self.tokens.refresh_secret {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_SECRET".to_string(),
                value: "must differ from JWT_ACCESS_SECRET".to_string(),
            });
        }

        if self.is_production() {
            if self.tokens.access_secret == TokenConfig::default().access_secret {
                return Err(ConfigError::MissingRequired("JWT_ACCESS_SECRET".to_string()));
            }
            if self.tokens.refresh_secret == TokenConfig::default().refresh_secret {
                return Err(ConfigError::MissingRequired("JWT_REFRESH_SECRET".to_string()));
            }
        }

        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(env) = std::env::var("APP_ENV") {
            self.server.environment = env.parse()?;
        }
        if let Some(cross_site) = parse_env("COOKIE_CROSS_SITE")? {
            self.server.cross_site_cookies = Some(cross_site);
        }

        // CORS origins from environment variable (comma-separated)
        if let Ok(origins) = std::env::var("CLIENT_ORIGIN") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.postgres_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(size) = parse_env("DATABASE_POOL_SIZE")? {
            self.database.pool_size = size;
        }

        // Tokens
        if let Ok(secret) = std::env::var("JWT_ACCESS_SECRET") {
            self.tokens.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("JWT_REFRESH_SECRET") {
            self.tokens.refresh_secret = secret;
        }
        if let Some(secs) = parse_env("JWT_ACCESS_EXPIRATION_SECS")? {
            self.tokens.access_expiration_secs = secs;
        }
        if let Some(secs) = parse_env("JWT_REFRESH_EXPIRATION_SECS")? {
            self.tokens.refresh_expiration_secs = secs;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.tokens.issuer = issuer;
        }

        // Password hashing
        if let Some(cost) = parse_env("ARGON2_MEMORY_KB")? {
            self.password.memory_cost = cost;
        }
        if let Some(cost) = parse_env("ARGON2_ITERATIONS")? {
            self.password.time_cost = cost;
        }

        // Password reset
        if let Some(secs) = parse_env("RESET_TOKEN_TTL_SECS")? {
            self.reset.token_ttl_secs = secs;
        }
        if let Some(expose) = parse_env("RESET_EXPOSE_TOKEN")? {
            self.reset.expose_token = Some(expose);
        }

        // Yandex ID
        if let Ok(id) = std::env::var("YANDEX_CLIENT_ID") {
            self.yandex.client_id = Some(id).filter(|v| !v.trim().is_empty());
        }
        if let Ok(secret) = std::env::var("YANDEX_CLIENT_SECRET") {
            self.yandex.client_secret = Some(secret).filter(|v| !v.trim().is_empty());
        }
        if let Ok(url) = std::env::var("YANDEX_TOKEN_URL") {
            self.yandex.token_url = url;
        }
        if let Ok(url) = std::env::var("YANDEX_INFO_URL") {
            self.yandex.info_url = url;
        }

        // Bootstrap
        if let Ok(name) = std::env::var("BOOTSTRAP_ADMIN_USERNAME") {
            self.bootstrap.admin_username = name;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }
}

/// Parse an optional environment variable into `T`
fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" | "test" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                key: "APP_ENV".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    pub environment: Environment,

    /// Allowed origins for CORS (credentials are always allowed)
    pub cors_origins: Vec<String>,

    /// Force `SameSite=None; Secure` on the refresh cookie; defaults to production
    pub cross_site_cookies: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            environment: Environment::Development,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:5174".to_string(),
                "http://localhost:5175".to_string(),
            ],
            cross_site_cookies: None,
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; in-memory stores are used when unset
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 10,
        }
    }
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,

    /// HMAC secret for refresh tokens (must differ from the access secret)
    pub refresh_secret: String,

    /// Access token lifetime (default: 30 minutes)
    pub access_expiration_secs: u64,

    /// Refresh token lifetime (default: 30 days)
    pub refresh_expiration_secs: u64,

    /// Token issuer identifier
    pub issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_secret: "development-access-secret-change-in-production".to_string(),
            refresh_secret: "development-refresh-secret-change-in-production".to_string(),
            access_expiration_secs: 30 * 60,
            refresh_expiration_secs: 30 * 24 * 60 * 60,
            issuer: "latchkey".to_string(),
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 19456 = 19 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 2)
    pub time_cost: u32,
    /// Parallelism (threads, default: 1)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Password reset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Reset token lifetime (default: 1 hour)
    pub token_ttl_secs: i64,

    /// Echo the reset token in the response; defaults to non-production
    pub expose_token: Option<bool>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 60 * 60,
            expose_token: None,
        }
    }
}

/// Yandex ID OAuth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YandexConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Authorization code exchange endpoint
    pub token_url: String,
    /// Profile endpoint
    pub info_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl YandexConfig {
    /// Both client credentials are present
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl Default for YandexConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://oauth.yandex.ru/token".to_string(),
            info_url: "https://login.yandex.ru/info?format=json".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Bootstrap account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Username that receives the admin role at registration
    pub admin_username: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.tokens.access_expiration_secs, 1800);
        assert_eq!(config.tokens.refresh_expiration_secs, 2_592_000);
        assert_eq!(config.reset.token_ttl_secs, 3600);
        assert!(!config.is_production());
        assert!(!config.cross_site_cookies());
        assert!(config.expose_reset_token());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_production_defaults() {
        let mut config = AppConfig::default();
        config.server.environment = Environment::Production;

        assert!(config.cross_site_cookies());
        assert!(!config.expose_reset_token());
        // Development secrets are refused in production
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        config.tokens.access_secret = "a".repeat(32);
        config.tokens.refresh_secret = "b".repeat(32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_secret_rejected() {
        let mut config = AppConfig::default();
        config.tokens.refresh_secret = config.tokens.access_secret.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000
environment = "production"

[yandex]
client_id = "abc"
client_secret = "def"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.is_production());
        assert!(config.yandex.is_configured());
        // Unspecified sections keep their defaults
        assert_eq!(config.tokens.issuer, "latchkey");
    }

    #[test]
    fn test_from_file_missing() {
        let result = AppConfig::from_file("/nonexistent/latchkey.toml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }
}
