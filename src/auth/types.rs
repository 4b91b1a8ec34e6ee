// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Kind of raw credential material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Legacy service token (`INFISICAL_TOKEN`)
    ServiceToken,

    /// Pre-issued universal-auth access token
    AccessToken,

    /// Universal-auth client ID + client secret
    ClientIdSecret,

    /// Cloud-issued identity JWT (GCP, Azure)
    CloudIdentity,

    /// Kubernetes projected service-account token
    KubernetesToken,
}

/// Credential material read from one source
///
/// Read once, handed to the exchanger, then dropped. The secret bytes are
/// wiped on drop.
#[derive(Clone)]
pub struct RawCredential {
    pub kind: CredentialKind,
    pub origin: String,
    /// Client ID or machine identity ID, when the method needs one
    pub identity: Option<String>,
    secret: Zeroizing<Vec<u8>>,
}

impl RawCredential {
    pub fn new(
        kind: CredentialKind,
        origin: impl Into<String>,
        identity: Option<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            origin: origin.into(),
            identity,
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Secret as UTF-8 text, lossy
    pub fn secret_str(&self) -> String {
        String::from_utf8_lossy(&self.secret).into_owned()
    }
}

impl fmt::Debug for RawCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCredential")
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Bearer token issued by the backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to print in logs
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretToken({})", self.redacted())
    }
}

impl Drop for SecretToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Active API session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: SecretToken,
    pub expires_at: DateTime<Utc>,
    /// Identifier of the auth method that produced the session
    pub method: String,
}

impl Session {
    /// Usable only strictly before `expires_at`
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Backend login flow used to exchange a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEndpoint {
    /// `GET /v2/service-token`, credential sent as bearer
    ServiceToken,
    /// `POST /v1/auth/token/renew`
    TokenRenew,
    /// `POST /v1/auth/universal-auth/login`
    UniversalAuth,
    /// `POST /v1/auth/kubernetes-auth/login`
    Kubernetes,
    /// `POST /v1/auth/gcp-auth/login`
    Gcp,
    /// `POST /v1/auth/azure-auth/login`
    Azure,
}

impl LoginEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            LoginEndpoint::ServiceToken => "/v2/service-token",
            LoginEndpoint::TokenRenew => "/v1/auth/token/renew",
            LoginEndpoint::UniversalAuth => "/v1/auth/universal-auth/login",
            LoginEndpoint::Kubernetes => "/v1/auth/kubernetes-auth/login",
            LoginEndpoint::Gcp => "/v1/auth/gcp-auth/login",
            LoginEndpoint::Azure => "/v1/auth/azure-auth/login",
        }
    }
}

/// Universal auth login request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalAuthLoginRequest {
    pub client_id: String,
    pub client_secret: String,
}

/// Kubernetes / GCP / Azure login request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityJwtLoginRequest {
    pub identity_id: String,
    pub jwt: String,
}

/// Access token renewal request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRenewRequest {
    pub access_token: String,
}

/// Machine identity login response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineIdentityLoginResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(rename = "accessTokenMaxTTL")]
    pub access_token_max_ttl: Option<u64>,
    pub token_type: Option<String>,
}

/// Service token details response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTokenDetailsResponse {
    pub expires_at: Option<DateTime<Utc>>,
}

/// Azure instance metadata token response
#[derive(Deserialize)]
pub struct AzureMetadataTokenResponse {
    pub access_token: String,
}

/// GCP service account key file (the fields we need)
#[derive(Deserialize)]
pub struct GcpServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: Option<String>,
}

/// Claims of the self-signed GCP IAM JWT
#[derive(Serialize)]
pub struct GcpIamClaims {
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_raw_credential_debug_is_redacted() {
        let cred = RawCredential::new(
            CredentialKind::ServiceToken,
            "env INFISICAL_TOKEN",
            None,
            "st.super-secret",
        );
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(cred.secret_str(), "st.super-secret");
    }

    #[test]
    fn test_secret_token_redacted() {
        let token = SecretToken::new("eyJhbGciOiJIUzI1NiJ9.payload");
        assert_eq!(token.redacted(), "eyJhbGci...");
        assert!(!format!("{:?}", token).contains("payload"));
    }

    #[test]
    fn test_session_expiry_boundary() {
        let session = Session {
            token: SecretToken::new("t"),
            expires_at: Utc::now() - Duration::seconds(1),
            method: "service-token".to_string(),
        };
        assert!(session.is_expired());

        let session = Session {
            expires_at: Utc::now() + Duration::minutes(5),
            ..session
        };
        assert!(!session.is_expired());
    }

    #[test]
    fn test_session_serialization() {
        let session = Session {
            token: SecretToken::new("access"),
            expires_at: Utc::now() + Duration::minutes(5),
            method: "universal-auth".to_string(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["token"], "access");
        assert_eq!(json["method"], "universal-auth");
        assert!(json["expiresAt"].is_string());
    }

    #[test]
    fn test_login_response_parsing() {
        let data: MachineIdentityLoginResponse = serde_json::from_str(
            r#"{"accessToken":"abc","expiresIn":7200,"accessTokenMaxTTL":null,"tokenType":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(data.access_token, "abc");
        assert_eq!(data.expires_in, 7200);
        assert_eq!(data.access_token_max_ttl, None);
        assert_eq!(data.token_type.as_deref(), Some("Bearer"));
    }
}
