use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::auth::TokenVerifier;
use crate::clock::Clock;

/// Allowed clock skew for `exp` and `iat`, in seconds
const LEEWAY_SECS: u64 = 60;

/// Claims carried by the webhook identity token
/// Note: Unknown fields are ignored
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// `aud` may be a single string or a list
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// JWKS (JSON Web Key Set) response from OIDC provider
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Individual JSON Web Key
#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    #[serde(rename = "use")]
    key_use: Option<String>,
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    // RSA
    n: Option<String>,
    e: Option<String>,
    // EC
    x: Option<String>,
    y: Option<String>,
}

/// OIDC Discovery document
#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    issuer: String,
    jwks_uri: String,
}

/// JWKS cache entry with TTL
#[derive(Clone)]
struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl JwksCache {
    fn new(keys: HashMap<String, DecodingKey>) -> Self {
        Self {
            keys,
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(3600), // 1 hour default TTL
        }
    }

    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }
}

/// Parse a JWKS document into decoding keys by key id
///
/// Keys without a `kid`, encryption keys and unsupported key types are skipped.
fn parse_jwks(body: &str) -> Result<HashMap<String, DecodingKey>> {
    let jwks: JwksResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("Failed to parse JWKS response: {}", e))?;

    let mut keys = HashMap::new();

    for jwk in jwks.keys {
        if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
            continue;
        }
        let Some(kid) = jwk.kid.clone() else {
            tracing::debug!("Skipping JWK without kid");
            continue;
        };

        let decoding_key = match jwk.kty.as_str() {
            "RSA" => {
                let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                    bail!("RSA JWK {} is missing n or e", kid);
                };
                DecodingKey::from_rsa_components(n, e)
                    .context("Failed to create decoding key from JWK")?
            }
            "EC" => {
                let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                    bail!("EC JWK {} is missing x or y", kid);
                };
                DecodingKey::from_ec_components(x, y)
                    .context("Failed to create decoding key from JWK")?
            }
            other => {
                tracing::debug!(kid = %kid, kty = %other, "Skipping unsupported JWK");
                continue;
            }
        };

        tracing::debug!(kid = %kid, kty = %jwk.kty, alg = ?jwk.alg, "Loaded JWK");
        keys.insert(kid, decoding_key);
    }

    Ok(keys)
}

/// Reject tokens issued further in the future than the allowed skew
fn check_issued_at(iat: Option<i64>, now: i64) -> Result<()> {
    match iat {
        Some(iat) if iat > now + LEEWAY_SECS as i64 => {
            Err(anyhow!("Token issued in the future (iat={}, now={})", iat, now))
        }
        _ => Ok(()),
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// JWT validator for a single OIDC issuer
///
/// Uses OIDC discovery to find the JWKS endpoint, caches the keys for an hour
/// and refreshes once when a token names an unknown key id.
pub struct JwtValidator {
    issuer_url: String,
    audience: String,
    http_client: reqwest::Client,
    jwks_cache: Arc<RwLock<Option<JwksCache>>>,
    clock: Arc<dyn Clock>,
}

impl JwtValidator {
    pub fn new(
        http_client: reqwest::Client,
        issuer_url: impl Into<String>,
        audience: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into().trim_end_matches('/').to_string(),
            audience: audience.into(),
            http_client,
            jwks_cache: Arc::new(RwLock::new(None)),
            clock,
        }
    }

    /// Discover JWKS URI from the issuer via .well-known/openid-configuration
    async fn discover_jwks_uri(&self) -> Result<String> {
        let discovery_url = format!("{}/.well-known/openid-configuration", self.issuer_url);

        tracing::debug!("Discovering OIDC configuration from {}", discovery_url);

        let response = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .context("Failed to fetch OIDC discovery document")?
            .error_for_status()
            .context("OIDC discovery request failed")?;

        let discovery: OidcDiscovery = response
            .json()
            .await
            .context("Failed to parse OIDC discovery document")?;

        if discovery.issuer.trim_end_matches('/') != self.issuer_url {
            bail!(
                "OIDC discovery issuer mismatch: expected {}, got {}",
                self.issuer_url,
                discovery.issuer
            );
        }

        Ok(discovery.jwks_uri)
    }

    /// Fetch JWKS from a JWKS URI
    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<HashMap<String, DecodingKey>> {
        tracing::debug!("Fetching JWKS from {}", jwks_uri);

        let response_text = self
            .http_client
            .get(jwks_uri)
            .send()
            .await
            .context("Failed to fetch JWKS")?
            .error_for_status()
            .context("JWKS request failed")?
            .text()
            .await
            .context("Failed to read JWKS response body")?;

        let keys = parse_jwks(&response_text)?;
        tracing::info!("Loaded {} signing keys from JWKS", keys.len());
        Ok(keys)
    }

    /// Get the key set (with caching)
    async fn get_jwks(&self, force_refresh: bool) -> Result<HashMap<String, DecodingKey>> {
        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if !cached.is_expired() {
                    tracing::debug!("Using cached JWKS for {}", self.issuer_url);
                    return Ok(cached.keys.clone());
                }
                tracing::debug!("JWKS cache expired for {}", self.issuer_url);
            }
        }

        tracing::info!("Fetching fresh JWKS for {}", self.issuer_url);
        let jwks_uri = self.discover_jwks_uri().await?;
        let keys = self.fetch_jwks(&jwks_uri).await?;

        *self.jwks_cache.write().await = Some(JwksCache::new(keys.clone()));

        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.get_jwks(false).await?.remove(kid) {
            return Ok(key);
        }
        tracing::debug!(kid = %kid, "Key not in cached JWKS, refreshing");
        self.get_jwks(true)
            .await?
            .remove(kid)
            .ok_or_else(|| anyhow!("Key {} not found in JWKS for issuer {}", kid, self.issuer_url))
    }

    /// Validate a JWT against the configured issuer and audience
    pub async fn validate(&self, token: &str) -> Result<WebhookClaims> {
        let header = decode_header(token).context("Failed to decode JWT header")?;
        if !is_asymmetric(header.alg) {
            bail!("Unsupported JWT algorithm {:?}", header.alg);
        }
        let kid = header
            .kid
            .ok_or_else(|| anyhow!("JWT header missing kid"))?;

        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer_url]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECS;

        let token_data = decode::<WebhookClaims>(token, &key, &validation)
            .context("Failed to validate JWT token")?;

        check_issued_at(token_data.claims.iat, self.clock.now().timestamp())?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtValidator {
    async fn verify(&self, token: &str) -> Result<WebhookClaims> {
        self.validate(token).await
    }
}
