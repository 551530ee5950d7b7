use thiserror::Error;

use super::sigv4::SigningError;

/// Failures while turning local cloud credentials into registry credentials
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("failed to load native cloud credentials: {0}")]
    Credentials(String),

    #[error("failed to sign GetCallerIdentity request: {0}")]
    Signing(#[from] SigningError),

    #[error("invalid value for header {header}: control characters are not allowed")]
    InvalidHeader { header: &'static str },

    #[error("invalid token exchange endpoint: {0}")]
    Endpoint(String),

    #[error("token exchange request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("got HTTP {status} from token exchange: {body}")]
    Exchange { status: u16, body: String },

    #[error("failed to decode token exchange response: {0}")]
    Decode(String),

    #[error("failed to resolve native registry credentials for {host}: {source:#}")]
    NativeRegistry {
        host: String,
        source: anyhow::Error,
    },

    #[error("no credential provider answered for registry {0}")]
    Unresolved(String),
}
