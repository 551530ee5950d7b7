//! AWS Signature Version 4 request signing
//!
//! Only the pieces needed to sign a request whose payload hash is known up
//! front (header-based signing, no chunked payloads, no presigning).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of an empty payload, hex encoded
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Headers that are never part of the signature
const UNSIGNED_HEADERS: &[&str] = &["authorization", "user-agent", "content-length", "expect"];

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("missing access key id or secret access key")]
    MissingCredentials,
    #[error("invalid HMAC key")]
    InvalidKey,
}

/// A plain HTTP request description: enough to sign it and serialize it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            host: host.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup (first match)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query string in insertion order, RFC 3986 encoded
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus query, as it appears on the HTTP/1.1 request line
    pub fn request_target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }
}

/// Everything the signer needs besides the request itself
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// Result of signing; the same values are written into the request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningOutput {
    pub signature: String,
    pub signed_headers: String,
    pub credential_scope: String,
    pub amz_date: String,
}

/// Sign `request` in place.
///
/// Adds `X-Amz-Date`, `X-Amz-Security-Token` (when a session token is
/// present) and `Authorization` headers.
pub fn sign_request(
    request: &mut HttpRequest,
    params: &SigningParams<'_>,
    payload_hash: &str,
) -> Result<SigningOutput, SigningError> {
    if params.access_key_id.is_empty() || params.secret_access_key.is_empty() {
        return Err(SigningError::MissingCredentials);
    }

    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();

    request.headers.retain(|(k, _)| {
        !k.eq_ignore_ascii_case("authorization")
            && !k.eq_ignore_ascii_case("x-amz-date")
            && !k.eq_ignore_ascii_case("x-amz-security-token")
    });
    request.headers.push(("X-Amz-Date".to_string(), amz_date.clone()));
    if let Some(token) = params.session_token.filter(|t| !t.is_empty()) {
        request
            .headers
            .push(("X-Amz-Security-Token".to_string(), token.to_string()));
    }

    let (canonical_headers, signed_headers) = canonical_headers(request);
    let canonical = canonical_request(request, &canonical_headers, &signed_headers, payload_hash);

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date, params.region, params.service
    );
    let to_sign = string_to_sign(&amz_date, &credential_scope, &canonical);

    let key = signing_key(params.secret_access_key, &date, params.region, params.service)?;
    let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes())?);

    request.headers.push((
        "Authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, params.access_key_id, credential_scope, signed_headers, signature
        ),
    ));

    Ok(SigningOutput {
        signature,
        signed_headers,
        credential_scope,
        amz_date,
    })
}

/// Canonical header block and the matching `SignedHeaders` list
fn canonical_headers(request: &HttpRequest) -> (String, String) {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if request.header("host").is_none() {
        headers
            .entry("host".to_string())
            .or_default()
            .push(request.host.clone());
    }

    for (name, value) in &request.headers {
        let name = name.to_ascii_lowercase();
        if UNSIGNED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.entry(name).or_default().push(normalize_value(value));
    }

    let block = headers
        .iter()
        .map(|(name, values)| format!("{}:{}\n", name, values.join(",")))
        .collect::<String>();
    let signed = headers.keys().cloned().collect::<Vec<_>>().join(";");

    (block, signed)
}

/// Trim and collapse runs of spaces
fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(request: &HttpRequest) -> String {
    let mut pairs: Vec<(String, String)> = request
        .query
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(
    request: &HttpRequest,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_ascii_uppercase(),
        canonical_uri(&request.path),
        canonical_query(request),
        canonical_headers,
        signed_headers,
        payload_hash
    )
}

fn string_to_sign(amz_date: &str, credential_scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day, per-region, per-service signing key
pub fn signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_access_key).as_bytes(),
        date.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}
