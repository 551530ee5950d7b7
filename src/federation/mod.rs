//! Cross-cloud credential federation.
//!
//! An AWS identity is proven to the source registry's issuer with a signed
//! (but never sent) STS `GetCallerIdentity` request; the issuer verifies it
//! and hands back a short-lived registry token.

pub mod assertion;
mod error;
pub mod exchange;
pub mod sigv4;

pub use assertion::{AssertionBuilder, SignedAssertion};
pub use error::FederationError;
pub use exchange::FederatedCredentials;
