//! Refresh token cookie
//!
//! The refresh token never reaches client-side script: it is set as an
//! `HttpOnly` cookie on every session-issuing response and read back on
//! `/refresh` and `/logout`.

use crate::error::AppError;
use axum::http::{header, HeaderMap, HeaderValue};

/// Name of the refresh token cookie
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Cookie attributes for the deployment
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    /// Lifetime in seconds, matching the refresh token TTL
    pub max_age_secs: u64,
    /// `SameSite=None; Secure` instead of `SameSite=Lax`
    pub cross_site: bool,
}

impl CookiePolicy {
    pub fn new(max_age_secs: u64, cross_site: bool) -> Self {
        Self {
            max_age_secs,
            cross_site,
        }
    }

    fn attributes(&self) -> &'static str {
        if self.cross_site {
            "SameSite=None; Secure"
        } else {
            "SameSite=Lax"
        }
    }

    /// `Set-Cookie` value carrying a refresh token
    pub fn set_refresh(&self, token: &str) -> Result<HeaderValue, AppError> {
        HeaderValue::from_str(&format!(
            "{REFRESH_COOKIE}={token}; Max-Age={}; Path=/; HttpOnly; {}",
            self.max_age_secs,
            self.attributes()
        ))
        .map_err(|e| AppError::Internal(format!("Invalid cookie value: {e}")))
    }

    /// `Set-Cookie` value that removes the refresh token
    pub fn clear_refresh(&self) -> HeaderValue {
        let value = format!(
            "{REFRESH_COOKIE}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/; HttpOnly; {}",
            self.attributes()
        );
        HeaderValue::from_str(&value)
            .unwrap_or_else(|_| HeaderValue::from_static("refreshToken=; Max-Age=0; Path=/"))
    }
}

/// Read the refresh token from the request's `Cookie` headers
pub fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
