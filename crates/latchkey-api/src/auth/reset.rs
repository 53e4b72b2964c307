//! Password reset lifecycle
//!
//! A reset token is 32 random bytes, URL-safe base64 encoded, stored on the
//! user with an expiry. It is single-use: a successful reset clears both fields.

use super::models::{ForgotPasswordResponse, MessageResponse};
use super::password::{validate_password_length, PasswordHasher};
use crate::error::AppError;
use base64::Engine;
use chrono::{Duration, Utc};
use latchkey_core::CredentialStore;
use rand::Rng;
use std::sync::Arc;

/// Returned for every reset request, whether or not the email matched
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, password reset instructions have been sent";

/// Generate a fresh reset token
pub fn generate_reset_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

pub struct PasswordResetService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<PasswordHasher>,
    token_ttl: Duration,
    expose_token: bool,
}

impl PasswordResetService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<PasswordHasher>,
        token_ttl_secs: i64,
        expose_token: bool,
    ) -> Self {
        Self {
            store,
            hasher,
            token_ttl: Duration::seconds(token_ttl_secs),
            expose_token,
        }
    }

    /// Issue a reset token for the account with this email, if there is one
    pub async fn request_reset(&self, email: &str) -> Result<ForgotPasswordResponse, AppError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::BadRequest("Email is required".to_string()));
        }

        let mut reset_token = None;
        if let Some(mut user) = self.store.find_by_email(email).await? {
            let token = generate_reset_token();
            user.reset_token = Some(token.clone());
            user.reset_token_expires = Some(Utc::now() + self.token_ttl);
            self.store.save(&user).await?;

            tracing::info!(user_id = %user.id, "Password reset requested");
            reset_token = Some(token);
        } else {
            tracing::debug!("Password reset requested for unknown email");
        }

        Ok(ForgotPasswordResponse {
            message: RESET_REQUESTED_MESSAGE.to_string(),
            reset_token: reset_token.filter(|_| self.expose_token),
        })
    }

    /// Set a new password using a live reset token
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<MessageResponse, AppError> {
        if token.is_empty() || new_password.is_empty() {
            return Err(AppError::BadRequest(
                "Token and password are required".to_string(),
            ));
        }
        validate_password_length(new_password).map_err(AppError::BadRequest)?;

        let mut user = self
            .store
            .find_by_reset_token(token, Utc::now())
            .await?
            .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".to_string()))?;

        user.password_hash = self.hasher.hash(new_password)?;
        user.clear_reset_token();
        self.store.save(&user).await?;

        tracing::info!(user_id = %user.id, "Password reset completed");
        Ok(MessageResponse::new("Password has been reset"))
    }
}
