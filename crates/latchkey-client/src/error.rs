//! Client error types

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the session client
///
/// `Clone` so one refresh outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

/// Error body written by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl ClientError {
    /// Status code of an HTTP error
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Http { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Build an `Http` error from a failed response, keeping the server's code and message
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();

        let (code, message) = match body {
            Some(body) => (
                body.code,
                body.message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
            ),
            None => (None, status.canonical_reason().unwrap_or("").to_string()),
        };

        ClientError::Http {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}
