// Credential exchange
// Trades a raw credential for a session at the backend identity endpoint

use chrono::{DateTime, Duration, Utc};
use reqwest::Request;
use tokio_util::sync::CancellationToken;

use super::registry::AuthMethod;
use super::types::{
    IdentityJwtLoginRequest, LoginEndpoint, MachineIdentityLoginResponse, RawCredential,
    SecretToken, ServiceTokenDetailsResponse, Session, TokenRenewRequest,
    UniversalAuthLoginRequest,
};
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::http_client::ExchangeHttpClient;

/// Upper bound on a declared token lifetime (ten years)
const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Exchanges raw credentials for sessions
pub struct TokenExchanger {
    http: ExchangeHttpClient,
    api_url: String,
    expiry_margin: Duration,
    service_token_ttl: Duration,
}

impl TokenExchanger {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: ExchangeHttpClient::new(config)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            expiry_margin: config.expiry_margin,
            service_token_ttl: config.service_token_ttl,
        })
    }

    /// Exchange `cred` using `method`'s login flow
    pub async fn exchange(
        &self,
        cred: &RawCredential,
        method: &AuthMethod,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        tracing::info!(
            method = %method.identifier,
            origin = %cred.origin,
            "Exchanging credential"
        );

        let request = self.build_request(cred, method)?;
        let response = self
            .http
            .request_with_retry(request, &method.identifier, cancel)
            .await?;

        let now = Utc::now();
        let (token, ttl) = match method.login {
            LoginEndpoint::ServiceToken => {
                let data: ServiceTokenDetailsResponse = response
                    .json()
                    .await
                    .map_err(|e| parse_error(&method.identifier, e))?;
                let ttl = data
                    .expires_at
                    .map(|at| at - now)
                    .unwrap_or(self.service_token_ttl);
                (SecretToken::new(cred.secret_str()), ttl)
            }
            _ => {
                let data: MachineIdentityLoginResponse = response
                    .json()
                    .await
                    .map_err(|e| parse_error(&method.identifier, e))?;

                if data.access_token.is_empty() {
                    return Err(AuthError::InvalidCredential {
                        method: method.identifier.clone(),
                        status: 200,
                        message: "response does not contain accessToken".to_string(),
                    });
                }

                let ttl = Duration::seconds(data.expires_in.min(MAX_TOKEN_TTL_SECS) as i64);
                (SecretToken::new(data.access_token), ttl)
            }
        };

        if ttl <= Duration::zero() {
            return Err(AuthError::InvalidCredential {
                method: method.identifier.clone(),
                status: 200,
                message: "token is already expired".to_string(),
            });
        }

        let session = Session {
            token,
            expires_at: session_expiry(now, ttl, self.expiry_margin),
            method: method.identifier.clone(),
        };

        tracing::info!(
            method = %session.method,
            token = %session.token.redacted(),
            expires_at = %session.expires_at.to_rfc3339(),
            "Session established"
        );

        Ok(session)
    }

    fn build_request(&self, cred: &RawCredential, method: &AuthMethod) -> Result<Request> {
        let url = format!("{}{}", self.api_url, method.login.path());
        let client = self.http.client();

        let builder = match method.login {
            LoginEndpoint::ServiceToken => client.get(&url).bearer_auth(cred.secret_str()),
            LoginEndpoint::TokenRenew => client.post(&url).json(&TokenRenewRequest {
                access_token: cred.secret_str(),
            }),
            LoginEndpoint::UniversalAuth => client.post(&url).json(&UniversalAuthLoginRequest {
                client_id: required_identity(cred, method)?,
                client_secret: cred.secret_str(),
            }),
            LoginEndpoint::Kubernetes | LoginEndpoint::Gcp | LoginEndpoint::Azure => {
                client.post(&url).json(&IdentityJwtLoginRequest {
                    identity_id: required_identity(cred, method)?,
                    jwt: cred.secret_str(),
                })
            }
        };

        builder
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build request for {}: {}", url, e)))
    }
}

/// `now + ttl - margin`, with the margin capped at half the ttl so very short
/// tokens still yield a usable session
fn session_expiry(now: DateTime<Utc>, ttl: Duration, margin: Duration) -> DateTime<Utc> {
    let ttl = ttl.max(Duration::zero());
    let margin = margin.min(ttl / 2);
    now + ttl - margin
}

fn required_identity(cred: &RawCredential, method: &AuthMethod) -> Result<String> {
    cred.identity.clone().ok_or_else(|| {
        AuthError::malformed(
            &cred.origin,
            format!("{} requires an identity alongside the credential", method.identifier),
        )
    })
}

fn parse_error(method: &str, e: reqwest::Error) -> AuthError {
    AuthError::InvalidCredential {
        method: method.to_string(),
        status: 200,
        message: format!("Failed to parse identity response: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{CredentialSource, EnvSnapshot, EnvironmentSource};
    use crate::auth::types::CredentialKind;
    use mockito::Matcher;
    use serde_json::json;

    fn test_config(api_url: String) -> Config {
        Config {
            api_url,
            base_backoff: std::time::Duration::from_millis(10),
            ..Config::default()
        }
    }

    fn method(identifier: &str, login: LoginEndpoint) -> AuthMethod {
        AuthMethod::new(
            identifier,
            1,
            CredentialSource::Environment(EnvironmentSource::token(
                CredentialKind::ServiceToken,
                "UNUSED",
                &EnvSnapshot::default(),
            )),
            login,
        )
    }

    #[test]
    fn test_session_expiry_applies_margin() {
        let now = Utc::now();
        let expires = session_expiry(now, Duration::seconds(3600), Duration::seconds(60));
        assert_eq!(expires, now + Duration::seconds(3540));
    }

    #[test]
    fn test_session_expiry_caps_margin_for_short_ttl() {
        let now = Utc::now();
        let expires = session_expiry(now, Duration::seconds(30), Duration::seconds(60));
        assert_eq!(expires, now + Duration::seconds(15));

        let expires = session_expiry(now, Duration::seconds(-5), Duration::seconds(60));
        assert_eq!(expires, now);
    }

    #[tokio::test]
    async fn test_universal_auth_exchange() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/universal-auth/login")
            .match_body(Matcher::Json(json!({
                "clientId": "client-id",
                "clientSecret": "client-secret"
            })))
            .with_status(200)
            .with_body(r#"{"accessToken":"ua-access","expiresIn":7200,"accessTokenMaxTTL":2592000,"tokenType":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(
            CredentialKind::ClientIdSecret,
            "test",
            Some("client-id".to_string()),
            "client-secret",
        );

        let before = Utc::now();
        let session = exchanger
            .exchange(
                &cred,
                &method("universal-auth", LoginEndpoint::UniversalAuth),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(session.token.expose(), "ua-access");
        assert_eq!(session.method, "universal-auth");
        assert!(session.expires_at >= before + Duration::seconds(7200 - 60));
        assert!(session.expires_at <= Utc::now() + Duration::seconds(7200 - 60));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_kubernetes_exchange_sends_identity_and_jwt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/kubernetes-auth/login")
            .match_body(Matcher::Json(json!({
                "identityId": "identity-1",
                "jwt": "k8s.jwt"
            })))
            .with_status(200)
            .with_body(r#"{"accessToken":"k8s-access","expiresIn":600}"#)
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(
            CredentialKind::KubernetesToken,
            "test",
            Some("identity-1".to_string()),
            "k8s.jwt",
        );

        let session = exchanger
            .exchange(
                &cred,
                &method("kubernetes", LoginEndpoint::Kubernetes),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(session.token.expose(), "k8s-access");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_service_token_exchange_uses_bearer_and_expiry() {
        let mut server = mockito::Server::new_async().await;
        let expires_at = Utc::now() + Duration::hours(2);
        let mock = server
            .mock("GET", "/v2/service-token")
            .match_header("authorization", "Bearer st.token.value")
            .with_status(200)
            .with_body(json!({ "expiresAt": expires_at.to_rfc3339() }).to_string())
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(CredentialKind::ServiceToken, "test", None, "st.token.value");

        let session = exchanger
            .exchange(
                &cred,
                &method("service-token", LoginEndpoint::ServiceToken),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(session.token.expose(), "st.token.value");
        assert!(session.expires_at <= expires_at - Duration::seconds(60));
        assert!(session.expires_at > Utc::now() + Duration::minutes(110));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_service_token_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let expired_at = Utc::now() - Duration::minutes(5);
        let mock = server
            .mock("GET", "/v2/service-token")
            .with_status(200)
            .with_body(json!({ "expiresAt": expired_at.to_rfc3339() }).to_string())
            .expect(1)
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(CredentialKind::ServiceToken, "test", None, "st.expired");

        let err = exchanger
            .exchange(
                &cred,
                &method("service-token", LoginEndpoint::ServiceToken),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidCredential { status: 200, .. }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_lifetime_access_token_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/auth/token/renew")
            .with_status(200)
            .with_body(r#"{"accessToken":"short-lived","expiresIn":0}"#)
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(CredentialKind::AccessToken, "test", None, "ua.token");

        let err = exchanger
            .exchange(
                &cred,
                &method("universal-auth-token", LoginEndpoint::TokenRenew),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, AuthError::InvalidCredential { .. }));
    }

    #[tokio::test]
    async fn test_401_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/token/renew")
            .with_status(401)
            .with_body(r#"{"message":"Invalid token"}"#)
            .expect(1)
            .create_async()
            .await;

        let exchanger = TokenExchanger::new(&test_config(server.url())).unwrap();
        let cred = RawCredential::new(CredentialKind::AccessToken, "test", None, "expired");

        let err = exchanger
            .exchange(
                &cred,
                &method("universal-auth-token", LoginEndpoint::TokenRenew),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthError::InvalidCredential { status: 401, .. }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_identity_is_malformed() {
        let exchanger = TokenExchanger::new(&test_config("http://127.0.0.1:9".to_string())).unwrap();
        let cred = RawCredential::new(CredentialKind::CloudIdentity, "test", None, "jwt");

        let err = exchanger
            .exchange(
                &cred,
                &method("azure", LoginEndpoint::Azure),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedCredential { .. }));
    }
}
