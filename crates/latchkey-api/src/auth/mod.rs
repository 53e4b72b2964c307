//! Authentication and session module
//!
//! - Token signing and verification for the access and refresh classes
//! - Password hashing with Argon2id
//! - Session service: register, login, refresh rotation, logout
//! - Refresh token cookie handling
//! - Password reset lifecycle
//! - Yandex ID linking
//! - Access and role middleware

pub mod cookie;
pub mod jwt;
pub mod linking;
pub mod middleware;
pub mod models;
pub mod password;
pub mod reset;
pub mod session;

pub use cookie::{extract_refresh_token, CookiePolicy, REFRESH_COOKIE};
pub use jwt::{Claims, JwtError, TokenCodec, TokenKind, TokenPair};
pub use linking::{
    normalize_avatar_url, IdentityLinkingService, IdentityProvider, ProviderError,
    ProviderProfile, YandexClient,
};
pub use middleware::{auth_middleware, authorize, require_any_role, AuthError, AuthenticatedUser};
pub use models::{
    AuthResponse, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest, UpdateProfileRequest, UpdateProfileResponse, UserInfo,
    UserProfile, UserPublic, YandexLoginRequest,
};
pub use password::{PasswordError, PasswordHasher};
pub use reset::PasswordResetService;
pub use session::{hash_token, SessionService};
