//! Latchkey Client - session manager for the Latchkey API
//!
//! Keeps the access token (in memory, or on disk with remember-me), lets the
//! HTTP client's cookie jar carry the refresh token, and transparently
//! refreshes and retries once when a call is rejected with `401`.

pub mod error;
pub mod models;
pub mod session;
pub mod storage;

pub use error::ClientError;
pub use models::{
    ForgotPasswordResponse, MessageResponse, Profile, ProfileUpdate, ProfileUpdateResponse,
    PublicUser, SessionResponse, UserInfo,
};
pub use session::{ClientConfig, SessionClient};
pub use storage::{CookieFile, TokenStore};
