//! Stub collaborators plus in-process token exchange and registry servers for tests.

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use oci_distribution::secrets::RegistryAuth;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::ecr::{CreateRepositoryError, RepositoryApi};
use crate::federation::FederationError;
use crate::registry::{CredentialsProvider, ImageCopier};
use crate::webhook::jwt::{Audience, WebhookClaims};
use crate::webhook::TokenVerifier;

/// How the fake token exchange answers
#[derive(Debug, Clone, Copy)]
pub enum ExchangeReply {
    Token(&'static str),
    Status(u16, &'static str),
    Json(&'static str),
}

/// One request received by the fake token exchange
#[derive(Debug, Clone)]
pub struct ExchangeCall {
    pub aud: Option<String>,
    pub identity: Option<String>,
    pub authorization: Option<String>,
}

impl ExchangeCall {
    /// Value of a header inside the decoded bearer assertion
    pub fn assertion_header(&self, name: &str) -> Option<String> {
        let token = self.authorization.as_deref()?.strip_prefix("Bearer ")?;
        let raw = String::from_utf8(URL_SAFE.decode(token).ok()?).ok()?;
        raw.split("\r\n").find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            key.eq_ignore_ascii_case(name).then(|| value.to_string())
        })
    }
}

#[derive(Clone)]
struct ExchangeState {
    reply: ExchangeReply,
    calls: Arc<Mutex<Vec<ExchangeCall>>>,
}

pub struct ExchangeServer {
    pub url: String,
    calls: Arc<Mutex<Vec<ExchangeCall>>>,
}

impl ExchangeServer {
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().unwrap().clone()
    }
}

async fn exchange(
    State(state): State<ExchangeState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.calls.lock().unwrap().push(ExchangeCall {
        aud: params.get("aud").cloned(),
        identity: params.get("identity").cloned(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    match state.reply {
        ExchangeReply::Token(token) => {
            (StatusCode::OK, serde_json::json!({ "token": token }).to_string()).into_response()
        }
        ExchangeReply::Status(status, body) => (
            StatusCode::from_u16(status).unwrap(),
            body.to_string(),
        )
            .into_response(),
        ExchangeReply::Json(body) => (StatusCode::OK, body.to_string()).into_response(),
    }
}

/// Start a fake `/sts/exchange` endpoint on 127.0.0.1
pub async fn spawn_exchange_server(reply: ExchangeReply) -> ExchangeServer {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/sts/exchange", post(exchange))
        .with_state(ExchangeState {
            reply,
            calls: calls.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ExchangeServer {
        url: format!("http://{}", addr),
        calls,
    }
}

/// Fixed basic credentials for one host
pub struct StaticCredentials {
    host: String,
    credentials: Option<(String, String)>,
    calls: AtomicUsize,
}

impl StaticCredentials {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            credentials: Some((username.to_string(), password.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails for its host
    pub fn failing(host: &str) -> Self {
        Self {
            host: host.to_string(),
            credentials: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn get_credentials(
        &self,
        registry_host: &str,
    ) -> Result<Option<RegistryAuth>, FederationError> {
        if registry_host != self.host {
            return Ok(None);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.credentials {
            Some((user, pass)) => Ok(Some(RegistryAuth::Basic(user.clone(), pass.clone()))),
            None => Err(FederationError::Credentials("static failure".to_string())),
        }
    }
}

/// In-memory repository registry
#[derive(Default)]
pub struct StubRepositories {
    existing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    failure: Option<String>,
}

impl StubRepositories {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepositoryApi for StubRepositories {
    async fn create_repository(&self, name: &str) -> Result<(), CreateRepositoryError> {
        self.calls.lock().unwrap().push(name.to_string());
        if let Some(message) = &self.failure {
            return Err(CreateRepositoryError::Failed(anyhow!(message.clone())));
        }
        if !self.existing.lock().unwrap().insert(name.to_string()) {
            return Err(CreateRepositoryError::AlreadyExists);
        }
        Ok(())
    }
}

/// Token verifier that accepts every token with fixed claims, or rejects all
pub struct StubVerifier {
    subject: Option<String>,
    rejection: String,
    calls: AtomicUsize,
}

impl StubVerifier {
    pub fn subject(subject: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            rejection: String::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            subject: None,
            rejection: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for StubVerifier {
    async fn verify(&self, _token: &str) -> anyhow::Result<WebhookClaims> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sub = self
            .subject
            .clone()
            .ok_or_else(|| anyhow!(self.rejection.clone()))?;
        Ok(WebhookClaims {
            iss: "https://issuer.test".to_string(),
            sub,
            aud: Audience::One("customer".to_string()),
            exp: i64::MAX,
            iat: None,
        })
    }
}

/// One recorded copy, with credentials reduced to `anonymous` or `basic:<user>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCall {
    pub source: String,
    pub source_auth: String,
    pub destination: String,
    pub destination_auth: String,
}

fn describe_auth(auth: &RegistryAuth) -> String {
    match auth {
        RegistryAuth::Anonymous => "anonymous".to_string(),
        RegistryAuth::Basic(user, _) => format!("basic:{}", user),
        #[allow(unreachable_patterns)]
        _ => "other".to_string(),
    }
}

/// Image copier that records calls instead of talking to registries
#[derive(Default)]
pub struct RecordingCopier {
    copies: Mutex<Vec<CopyCall>>,
    failure: Option<String>,
}

impl RecordingCopier {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageCopier for RecordingCopier {
    async fn copy(
        &self,
        source: &str,
        source_auth: &RegistryAuth,
        destination: &str,
        destination_auth: &RegistryAuth,
    ) -> anyhow::Result<String> {
        self.copies.lock().unwrap().push(CopyCall {
            source: source.to_string(),
            source_auth: describe_auth(source_auth),
            destination: destination.to_string(),
            destination_auth: describe_auth(destination_auth),
        });
        if let Some(message) = &self.failure {
            return Err(anyhow!(message.clone()));
        }
        Ok(format!("https://{}", destination))
    }
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[derive(Default)]
struct RegistryStore {
    /// (repository, tag or digest) -> (media type, bytes)
    manifests: HashMap<(String, String), (String, Vec<u8>)>,
    /// (repository, digest) -> bytes
    blobs: HashMap<(String, String), Vec<u8>>,
    uploads: HashMap<String, Vec<u8>>,
    next_upload: usize,
    manifest_pushes: Vec<String>,
}

/// In-memory OCI distribution registry on 127.0.0.1, plain HTTP, no auth
#[derive(Clone)]
pub struct FakeRegistry {
    pub host: String,
    store: Arc<Mutex<RegistryStore>>,
}

impl FakeRegistry {
    pub fn add_blob(&self, repository: &str, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        self.store
            .lock()
            .unwrap()
            .blobs
            .insert((repository.to_string(), digest.clone()), data.to_vec());
        digest
    }

    pub fn add_manifest(&self, repository: &str, reference: &str, media_type: &str, body: &[u8]) {
        self.store.lock().unwrap().manifests.insert(
            (repository.to_string(), reference.to_string()),
            (media_type.to_string(), body.to_vec()),
        );
    }

    pub fn add_manifest_by_digest(&self, repository: &str, media_type: &str, body: &[u8]) -> String {
        let digest = sha256_digest(body);
        self.add_manifest(repository, &digest, media_type, body);
        digest
    }

    pub fn manifest(&self, repository: &str, reference: &str) -> Option<(String, Vec<u8>)> {
        self.store
            .lock()
            .unwrap()
            .manifests
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
    }

    pub fn blob(&self, repository: &str, digest: &str) -> Option<Vec<u8>> {
        self.store
            .lock()
            .unwrap()
            .blobs
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
    }

    /// Pushed manifests as `<repository>:<reference>`, in push order
    pub fn manifest_pushes(&self) -> Vec<String> {
        self.store.lock().unwrap().manifest_pushes.clone()
    }
}

async fn registry_api(
    State(registry): State<FakeRegistry>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(path) = uri.path().strip_prefix("/v2/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if path.is_empty() {
        return (StatusCode::OK, "{}").into_response();
    }
    let mut store = registry.store.lock().unwrap();

    if let Some((repository, session)) = path.split_once("/blobs/uploads/") {
        let session = if session.is_empty() {
            store.next_upload += 1;
            store.next_upload.to_string()
        } else {
            session.to_string()
        };
        let location = format!("/v2/{}/blobs/uploads/{}", repository, session);
        let data = store.uploads.entry(session.clone()).or_default();
        data.extend_from_slice(&body);

        return match method {
            Method::POST | Method::PATCH => {
                (StatusCode::ACCEPTED, [(header::LOCATION, location)]).into_response()
            }
            Method::PUT => {
                let data = store.uploads.remove(&session).unwrap_or_default();
                let digest = params.get("digest").cloned().unwrap_or_default();
                if sha256_digest(&data) != digest {
                    return StatusCode::BAD_REQUEST.into_response();
                }
                store
                    .blobs
                    .insert((repository.to_string(), digest.clone()), data);
                let location = format!("/v2/{}/blobs/{}", repository, digest);
                (StatusCode::CREATED, [(header::LOCATION, location)]).into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((repository, reference)) = path.rsplit_once("/manifests/") {
        let key = (repository.to_string(), reference.to_string());
        return match method {
            Method::GET => match store.manifests.get(&key) {
                Some((media_type, data)) => (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, media_type.clone()),
                        (
                            header::HeaderName::from_static("docker-content-digest"),
                            sha256_digest(data),
                        ),
                    ],
                    data.clone(),
                )
                    .into_response(),
                None => not_found("MANIFEST_UNKNOWN"),
            },
            Method::PUT => {
                let media_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let digest = sha256_digest(&body);
                store.manifest_pushes.push(format!("{}:{}", repository, reference));
                store
                    .manifests
                    .insert(key, (media_type.clone(), body.to_vec()));
                store.manifests.insert(
                    (repository.to_string(), digest.clone()),
                    (media_type, body.to_vec()),
                );
                let location = format!("/v2/{}/manifests/{}", repository, digest);
                (StatusCode::CREATED, [(header::LOCATION, location)]).into_response()
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((repository, digest)) = path.rsplit_once("/blobs/") {
        return match store
            .blobs
            .get(&(repository.to_string(), digest.to_string()))
        {
            Some(data) => (StatusCode::OK, data.clone()).into_response(),
            None => not_found("BLOB_UNKNOWN"),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

fn not_found(code: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        serde_json::json!({"errors": [{"code": code, "message": code}]}).to_string(),
    )
        .into_response()
}

/// Start an in-memory registry speaking the distribution API
pub async fn spawn_fake_registry() -> FakeRegistry {
    let registry = FakeRegistry {
        host: String::new(),
        store: Arc::new(Mutex::new(RegistryStore::default())),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(registry_api).with_state(registry.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeRegistry {
        host: addr.to_string(),
        ..registry
    }
}
