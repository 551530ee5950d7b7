//! Inbound webhook handling: token verification and event classification.

pub mod auth;
pub mod event;
pub mod jwt;

pub use auth::{AuthError, TokenVerifier, WebhookAuthenticator};
pub use event::{classify, Classification, PushNotification, SkipReason};
pub use jwt::{JwtValidator, WebhookClaims};
