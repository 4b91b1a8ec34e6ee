// Credential sources
// Each variant reads raw credential material from one origin

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::types::{
    AzureMetadataTokenResponse, CredentialKind, GcpIamClaims, GcpServiceAccountKey, RawCredential,
};
use crate::error::{AuthError, Result};

/// Lifetime of the self-signed GCP IAM JWT
const GCP_IAM_JWT_LIFETIME_MINUTES: i64 = 15;

/// Environment captured once at process start
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of `name`, trimmed
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Source of raw credentials for one auth method
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Environment(EnvironmentSource),
    FilePath(FilePathSource),
    CloudMetadata(CloudMetadataSource),
    KubernetesToken(KubernetesTokenSource),
}

impl CredentialSource {
    /// Whether all inputs this source needs are present
    pub async fn is_configured(&self) -> bool {
        match self {
            CredentialSource::Environment(s) => s.is_configured(),
            CredentialSource::FilePath(s) => s.is_configured(),
            CredentialSource::CloudMetadata(s) => s.is_configured().await,
            CredentialSource::KubernetesToken(s) => s.is_configured(),
        }
    }

    /// Read the raw credential
    pub async fn read(&self) -> Result<RawCredential> {
        match self {
            CredentialSource::Environment(s) => s.read(),
            CredentialSource::FilePath(s) => s.read(),
            CredentialSource::CloudMetadata(s) => s.read().await,
            CredentialSource::KubernetesToken(s) => s.read(),
        }
    }

    /// Stable description of exactly which credential this source yields
    ///
    /// Contains secret material; hash it before it leaves the process.
    pub fn binding(&self) -> String {
        match self {
            CredentialSource::Environment(s) => format!(
                "{}|{}|{}",
                s.origin(),
                s.identity.as_deref().unwrap_or_default(),
                s.secret.as_deref().unwrap_or_default()
            ),
            CredentialSource::FilePath(s) => {
                format!("{}|{}", s.origin(), s.identity_id.as_deref().unwrap_or_default())
            }
            CredentialSource::CloudMetadata(s) => {
                format!("{}|{}", s.origin(), s.identity_id.as_deref().unwrap_or_default())
            }
            CredentialSource::KubernetesToken(s) => {
                format!("{}|{}", s.origin(), s.identity_id.as_deref().unwrap_or_default())
            }
        }
    }

    /// Human-readable origin, used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Environment(s) => s.origin(),
            CredentialSource::FilePath(s) => s.origin(),
            CredentialSource::CloudMetadata(s) => s.origin(),
            CredentialSource::KubernetesToken(s) => s.origin(),
        }
    }
}

// === Environment ===

/// Credential held in one environment variable, optionally paired with an
/// identity variable (client ID, machine identity ID)
#[derive(Debug, Clone)]
pub struct EnvironmentSource {
    kind: CredentialKind,
    secret_var: &'static str,
    secret: Option<String>,
    identity_var: Option<&'static str>,
    identity: Option<String>,
}

impl EnvironmentSource {
    /// Single-variable token
    pub fn token(kind: CredentialKind, var: &'static str, env: &EnvSnapshot) -> Self {
        Self {
            kind,
            secret_var: var,
            secret: env.get(var),
            identity_var: None,
            identity: None,
        }
    }

    /// Identity + secret pair; both must be present
    pub fn paired(
        kind: CredentialKind,
        identity_var: &'static str,
        secret_var: &'static str,
        env: &EnvSnapshot,
    ) -> Self {
        Self {
            kind,
            secret_var,
            secret: env.get(secret_var),
            identity_var: Some(identity_var),
            identity: env.get(identity_var),
        }
    }

    pub fn is_configured(&self) -> bool {
        let configured = self.secret.is_some() && (self.identity_var.is_none() || self.identity.is_some());
        if !configured && (self.secret.is_some() || self.identity.is_some()) {
            tracing::warn!(
                origin = %self.origin(),
                "Partial credentials in environment, ignoring"
            );
        }
        configured
    }

    pub fn read(&self) -> Result<RawCredential> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::unavailable(self.origin(), format!("{} is not set", self.secret_var)))?;

        if let Some(identity_var) = self.identity_var {
            if self.identity.is_none() {
                return Err(AuthError::unavailable(
                    self.origin(),
                    format!("{} is not set", identity_var),
                ));
            }
        }

        Ok(RawCredential::new(
            self.kind,
            self.origin(),
            self.identity.clone(),
            secret.as_bytes().to_vec(),
        ))
    }

    fn origin(&self) -> String {
        match self.identity_var {
            Some(identity_var) => format!("env {} + {}", identity_var, self.secret_var),
            None => format!("env {}", self.secret_var),
        }
    }
}

// === GCP IAM key file ===

/// Service-account key file on disk, turned into a signed identity JWT
#[derive(Debug, Clone)]
pub struct FilePathSource {
    path: Option<PathBuf>,
    identity_id: Option<String>,
}

impl FilePathSource {
    pub fn new(path: Option<PathBuf>, identity_id: Option<String>) -> Self {
        Self { path, identity_id }
    }

    pub fn is_configured(&self) -> bool {
        match (&self.path, &self.identity_id) {
            (Some(path), Some(_)) => std::fs::File::open(path).is_ok(),
            _ => false,
        }
    }

    pub fn read(&self) -> Result<RawCredential> {
        let origin = self.origin();
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| AuthError::unavailable(&origin, "key file path is not set"))?;
        let identity_id = self
            .identity_id
            .as_ref()
            .ok_or_else(|| AuthError::unavailable(&origin, "machine identity ID is not set"))?;

        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthError::unavailable(&origin, format!("cannot read {}: {}", path.display(), e))
        })?;

        let key: GcpServiceAccountKey = serde_json::from_str(&contents)
            .map_err(|e| AuthError::malformed(&origin, format!("not a service account key: {}", e)))?;

        let jwt = sign_gcp_iam_jwt(&key, identity_id)
            .map_err(|e| AuthError::malformed(&origin, e))?;

        tracing::debug!(
            client_email = %key.client_email,
            "Signed GCP IAM identity token"
        );

        Ok(RawCredential::new(
            CredentialKind::CloudIdentity,
            origin,
            Some(identity_id.clone()),
            jwt.into_bytes(),
        ))
    }

    fn origin(&self) -> String {
        match &self.path {
            Some(path) => format!("file {}", path.display()),
            None => "file <unset>".to_string(),
        }
    }
}

/// Sign a short-lived RS256 JWT asserting the service account's identity
fn sign_gcp_iam_jwt(key: &GcpServiceAccountKey, audience: &str) -> std::result::Result<String, String> {
    if key.client_email.is_empty() {
        return Err("client_email is empty".to_string());
    }

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| format!("invalid private_key: {}", e))?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let now = Utc::now();
    let claims = GcpIamClaims {
        sub: key.client_email.clone(),
        aud: audience.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(GCP_IAM_JWT_LIFETIME_MINUTES)).timestamp(),
    };

    jsonwebtoken::encode(&header, &claims, &encoding_key).map_err(|e| format!("signing failed: {}", e))
}

// === Cloud metadata ===

/// Cloud whose instance metadata service issues identity tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Gcp,
    Azure,
}

/// Identity token fetched from the instance metadata service
///
/// Configured only when a single probe reaches the metadata service within
/// the probe timeout. Nothing here retries.
#[derive(Debug, Clone)]
pub struct CloudMetadataSource {
    provider: CloudProvider,
    base_url: String,
    identity_id: Option<String>,
    client: Client,
}

impl CloudMetadataSource {
    pub fn new(
        provider: CloudProvider,
        base_url: impl Into<String>,
        identity_id: Option<String>,
        probe_timeout: std::time::Duration,
    ) -> Result<Self> {
        // Metadata services are link-local; never route them through a proxy
        let client = Client::builder()
            .timeout(probe_timeout)
            .connect_timeout(probe_timeout)
            .no_proxy()
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create metadata client: {}", e)))?;

        Ok(Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity_id,
            client,
        })
    }

    pub async fn is_configured(&self) -> bool {
        if self.identity_id.is_none() {
            return false;
        }

        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Cloud metadata probe failed");
                false
            }
        }
    }

    /// One reachability check against the metadata service
    pub async fn probe(&self) -> Result<()> {
        let request = match self.provider {
            CloudProvider::Gcp => self
                .client
                .get(format!("{}/computeMetadata/v1/", self.base_url))
                .header("Metadata-Flavor", "Google"),
            CloudProvider::Azure => self
                .client
                .get(format!("{}/metadata/instance", self.base_url))
                .query(&[("api-version", "2021-02-01")])
                .header("Metadata", "true"),
        };

        self.send(request).await.map(|_| ())
    }

    pub async fn read(&self) -> Result<RawCredential> {
        let origin = self.origin();
        let identity_id = self
            .identity_id
            .as_ref()
            .ok_or_else(|| AuthError::unavailable(&origin, "machine identity ID is not set"))?;

        let token = match self.provider {
            CloudProvider::Gcp => {
                let request = self
                    .client
                    .get(format!(
                        "{}/computeMetadata/v1/instance/service-accounts/default/identity",
                        self.base_url
                    ))
                    .query(&[("audience", identity_id.as_str()), ("format", "full")])
                    .header("Metadata-Flavor", "Google");
                self.send(request)
                    .await?
                    .text()
                    .await
                    .map_err(|e| AuthError::unavailable(&origin, format!("failed to read token: {}", e)))?
            }
            CloudProvider::Azure => {
                let request = self
                    .client
                    .get(format!("{}/metadata/identity/oauth2/token", self.base_url))
                    .query(&[
                        ("api-version", "2018-02-01"),
                        ("resource", "https://management.azure.com/"),
                    ])
                    .header("Metadata", "true");
                let data: AzureMetadataTokenResponse = self
                    .send(request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| AuthError::malformed(&origin, format!("unexpected token response: {}", e)))?;
                data.access_token
            }
        };

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::malformed(&origin, "metadata service returned an empty token"));
        }

        Ok(RawCredential::new(
            CredentialKind::CloudIdentity,
            origin,
            Some(identity_id.clone()),
            token.as_bytes().to_vec(),
        ))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let origin = self.origin();
        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "metadata service timed out".to_string()
            } else {
                format!("metadata service unreachable: {}", e)
            };
            AuthError::unavailable(&origin, reason)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::unavailable(
                &origin,
                format!("metadata service returned {}", status),
            ));
        }

        Ok(response)
    }

    fn origin(&self) -> String {
        match self.provider {
            CloudProvider::Gcp => format!("gcp metadata {}", self.base_url),
            CloudProvider::Azure => format!("azure metadata {}", self.base_url),
        }
    }
}

// === Kubernetes ===

/// Projected service-account token mounted into the pod
#[derive(Debug, Clone)]
pub struct KubernetesTokenSource {
    path: PathBuf,
    identity_id: Option<String>,
}

impl KubernetesTokenSource {
    pub fn new(path: impl Into<PathBuf>, identity_id: Option<String>) -> Self {
        Self {
            path: path.into(),
            identity_id,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.identity_id.is_some() && self.path.is_file()
    }

    pub fn read(&self) -> Result<RawCredential> {
        let origin = self.origin();
        let identity_id = self
            .identity_id
            .as_ref()
            .ok_or_else(|| AuthError::unavailable(&origin, "machine identity ID is not set"))?;

        let token = read_token_file(&self.path).map_err(|e| AuthError::unavailable(&origin, e.to_string()))?;
        if token.is_empty() {
            return Err(AuthError::malformed(&origin, "service account token file is empty"));
        }

        Ok(RawCredential::new(
            CredentialKind::KubernetesToken,
            origin,
            Some(identity_id.clone()),
            token.into_bytes(),
        ))
    }

    fn origin(&self) -> String {
        format!("kubernetes token {}", self.path.display())
    }
}

fn read_token_file(path: &Path) -> std::io::Result<String> {
    Ok(std::fs::read_to_string(path)?.trim_end().to_string())
}
