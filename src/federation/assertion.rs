use aws_credential_types::Credentials;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::fmt;
use std::sync::Arc;

use super::error::FederationError;
use super::sigv4::{sign_request, HttpRequest, SigningParams, EMPTY_PAYLOAD_SHA256};
use crate::clock::Clock;

/// Global STS endpoint the assertion is nominally addressed to
pub const STS_HOST: &str = "sts.amazonaws.com";
pub const STS_REGION: &str = "us-east-1";
pub const STS_SERVICE: &str = "sts";
pub const STS_ACTION: &str = "GetCallerIdentity";
pub const STS_VERSION: &str = "2011-06-15";

pub const AUDIENCE_HEADER: &str = "Chainguard-Audience";
pub const IDENTITY_HEADER: &str = "Chainguard-Identity";

/// A serialized, signed `GetCallerIdentity` request, base64url encoded.
///
/// Proves possession of the AWS identity to whoever can replay it against
/// STS. Built per exchange and dropped afterwards.
pub struct SignedAssertion(String);

impl SignedAssertion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedAssertion(<redacted>)")
    }
}

/// Builds signed identity assertions from native AWS credentials
pub struct AssertionBuilder {
    clock: Arc<dyn Clock>,
    user_agent: String,
}

impl AssertionBuilder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Build the signed request without encoding it
    pub fn signed_request(
        &self,
        credentials: &Credentials,
        audience: &str,
        identity: &str,
    ) -> Result<HttpRequest, FederationError> {
        check_header_value(AUDIENCE_HEADER, audience)?;
        check_header_value(IDENTITY_HEADER, identity)?;

        let mut request = HttpRequest::new("POST", STS_HOST, "/")
            .with_query("Action", STS_ACTION)
            .with_query("Version", STS_VERSION)
            .with_header("User-Agent", self.user_agent.as_str())
            .with_header("Content-Length", "0")
            .with_header("Accept", "application/json")
            .with_header(AUDIENCE_HEADER, audience)
            .with_header(IDENTITY_HEADER, identity);

        let params = SigningParams {
            access_key_id: credentials.access_key_id(),
            secret_access_key: credentials.secret_access_key(),
            session_token: credentials.session_token(),
            region: STS_REGION,
            service: STS_SERVICE,
            time: self.clock.now(),
        };
        sign_request(&mut request, &params, EMPTY_PAYLOAD_SHA256)?;

        Ok(request)
    }

    /// Build a fresh assertion for `audience` (the token exchange issuer) and
    /// `identity` (the assumable identity to exchange into)
    pub fn build(
        &self,
        credentials: &Credentials,
        audience: &str,
        identity: &str,
    ) -> Result<SignedAssertion, FederationError> {
        let request = self.signed_request(credentials, audience, identity)?;
        Ok(SignedAssertion(URL_SAFE.encode(serialize_request(&request))))
    }
}

fn check_header_value(header: &'static str, value: &str) -> Result<(), FederationError> {
    if value.chars().any(|c| c.is_control()) {
        return Err(FederationError::InvalidHeader { header });
    }
    Ok(())
}

/// HTTP/1.1 wire form: request line, `Host`, remaining headers sorted by
/// name, blank line. The body is always empty.
pub fn serialize_request(request: &HttpRequest) -> Vec<u8> {
    let mut headers: Vec<&(String, String)> = request
        .headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("host"))
        .collect();
    headers.sort_by_key(|(k, _)| k.to_ascii_lowercase());

    let mut out = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n",
        request.method,
        request.request_target(),
        request.host
    );
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}
