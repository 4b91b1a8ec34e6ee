// Auth method registry
// Fixed, ordered set of auth methods checked during resolution

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::credentials::{
    CloudMetadataSource, CloudProvider, CredentialSource, EnvSnapshot, EnvironmentSource,
    FilePathSource, KubernetesTokenSource,
};
use super::types::{CredentialKind, LoginEndpoint};
use crate::config::Config;
use crate::constants;
use crate::error::{AuthError, Result};

/// One way of authenticating against the backend
#[derive(Debug, Clone)]
pub struct AuthMethod {
    pub identifier: String,
    /// Lower values are checked first
    pub precedence: u32,
    pub source: CredentialSource,
    pub login: LoginEndpoint,
}

impl AuthMethod {
    pub fn new(
        identifier: impl Into<String>,
        precedence: u32,
        source: CredentialSource,
        login: LoginEndpoint,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            precedence,
            source,
            login,
        }
    }

    /// Hex SHA-256 over the method identifier and its source binding
    ///
    /// Two processes get the same fingerprint only if they would exchange the
    /// same credential through the same method.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identifier.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.source.binding().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Immutable, precedence-ordered list of auth methods
#[derive(Debug, Clone)]
pub struct AuthMethodRegistry {
    methods: Vec<AuthMethod>,
}

impl AuthMethodRegistry {
    /// Build a registry; identifiers and precedences must be unique
    pub fn new(mut methods: Vec<AuthMethod>) -> Result<Self> {
        let mut identifiers = HashSet::new();
        let mut precedences = HashSet::new();

        for method in &methods {
            if !identifiers.insert(method.identifier.as_str()) {
                return Err(AuthError::Config(format!(
                    "duplicate auth method identifier: {}",
                    method.identifier
                )));
            }
            if !precedences.insert(method.precedence) {
                return Err(AuthError::Config(format!(
                    "auth method {} reuses precedence {}",
                    method.identifier, method.precedence
                )));
            }
        }

        methods.sort_by_key(|m| m.precedence);
        Ok(Self { methods })
    }

    /// Registry of every supported method, in its fixed order
    ///
    /// Explicit tokens come first, then client credentials, then identities
    /// detected from the runtime environment.
    pub fn standard(env: &EnvSnapshot, config: &Config) -> Result<Self> {
        let identity_id = env.get(constants::INFISICAL_MACHINE_IDENTITY_ID_NAME);

        let kubernetes_token_path = env
            .get(constants::INFISICAL_KUBERNETES_SERVICE_ACCOUNT_TOKEN_NAME)
            .unwrap_or_else(|| constants::DEFAULT_KUBERNETES_SERVICE_ACCOUNT_TOKEN_PATH.to_string());

        let gcp_key_file = env
            .get(constants::INFISICAL_GCP_IAM_SERVICE_ACCOUNT_KEY_FILE_PATH_NAME)
            .map(|p| crate::config::expand_tilde(&p));

        Self::new(vec![
            AuthMethod::new(
                constants::SERVICE_TOKEN_IDENTIFIER,
                10,
                CredentialSource::Environment(EnvironmentSource::token(
                    CredentialKind::ServiceToken,
                    constants::INFISICAL_TOKEN_NAME,
                    env,
                )),
                LoginEndpoint::ServiceToken,
            ),
            AuthMethod::new(
                constants::UNIVERSAL_AUTH_TOKEN_IDENTIFIER,
                20,
                CredentialSource::Environment(EnvironmentSource::token(
                    CredentialKind::AccessToken,
                    constants::INFISICAL_UNIVERSAL_AUTH_ACCESS_TOKEN_NAME,
                    env,
                )),
                LoginEndpoint::TokenRenew,
            ),
            AuthMethod::new(
                constants::UNIVERSAL_AUTH_IDENTIFIER,
                30,
                CredentialSource::Environment(EnvironmentSource::paired(
                    CredentialKind::ClientIdSecret,
                    constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_ID_NAME,
                    constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET_NAME,
                    env,
                )),
                LoginEndpoint::UniversalAuth,
            ),
            AuthMethod::new(
                constants::KUBERNETES_AUTH_IDENTIFIER,
                40,
                CredentialSource::KubernetesToken(KubernetesTokenSource::new(
                    PathBuf::from(kubernetes_token_path),
                    identity_id.clone(),
                )),
                LoginEndpoint::Kubernetes,
            ),
            AuthMethod::new(
                constants::GCP_IAM_AUTH_IDENTIFIER,
                50,
                CredentialSource::FilePath(FilePathSource::new(gcp_key_file, identity_id.clone())),
                LoginEndpoint::Gcp,
            ),
            AuthMethod::new(
                constants::GCP_ID_TOKEN_AUTH_IDENTIFIER,
                60,
                CredentialSource::CloudMetadata(CloudMetadataSource::new(
                    CloudProvider::Gcp,
                    &config.gcp_metadata_url,
                    identity_id.clone(),
                    config.probe_timeout,
                )?),
                LoginEndpoint::Gcp,
            ),
            AuthMethod::new(
                constants::AZURE_AUTH_IDENTIFIER,
                70,
                CredentialSource::CloudMetadata(CloudMetadataSource::new(
                    CloudProvider::Azure,
                    &config.azure_metadata_url,
                    identity_id,
                    config.probe_timeout,
                )?),
                LoginEndpoint::Azure,
            ),
        ])
    }

    /// Methods in ascending precedence; each call starts from the beginning
    pub fn in_order(&self) -> impl Iterator<Item = &AuthMethod> + '_ {
        self.methods.iter()
    }

    /// Look up a method by identifier
    pub fn get(&self, identifier: &str) -> Option<&AuthMethod> {
        self.methods.iter().find(|m| m.identifier == identifier)
    }

    /// First method whose source is configured right now
    pub async fn first_configured(&self) -> Option<&AuthMethod> {
        for method in &self.methods {
            if method.source.is_configured().await {
                return Some(method);
            }
        }
        None
    }

    /// Fingerprint of every method, keyed by identifier
    pub fn fingerprints(&self) -> HashMap<String, String> {
        self.methods
            .iter()
            .map(|m| (m.identifier.clone(), m.fingerprint()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_method(identifier: &str, precedence: u32) -> AuthMethod {
        AuthMethod::new(
            identifier,
            precedence,
            CredentialSource::Environment(EnvironmentSource::token(
                CredentialKind::ServiceToken,
                constants::INFISICAL_TOKEN_NAME,
                &EnvSnapshot::default(),
            )),
            LoginEndpoint::ServiceToken,
        )
    }

    #[test]
    fn test_in_order_sorts_by_precedence() {
        let registry = AuthMethodRegistry::new(vec![
            env_method("c", 30),
            env_method("a", 10),
            env_method("b", 20),
        ])
        .unwrap();

        let order: Vec<&str> = registry.in_order().map(|m| m.identifier.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        // Restartable
        let again: Vec<&str> = registry.in_order().map(|m| m.identifier.as_str()).collect();
        assert_eq!(order, again);
    }

    #[test]
    fn test_rejects_duplicate_identifier() {
        let err = AuthMethodRegistry::new(vec![env_method("a", 10), env_method("a", 20)]).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_precedence() {
        let err = AuthMethodRegistry::new(vec![env_method("a", 10), env_method("b", 10)]).unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_standard_registry_order() {
        let registry = AuthMethodRegistry::standard(&EnvSnapshot::default(), &Config::default()).unwrap();
        let order: Vec<&str> = registry.in_order().map(|m| m.identifier.as_str()).collect();
        assert_eq!(
            order,
            vec![
                constants::SERVICE_TOKEN_IDENTIFIER,
                constants::UNIVERSAL_AUTH_TOKEN_IDENTIFIER,
                constants::UNIVERSAL_AUTH_IDENTIFIER,
                constants::KUBERNETES_AUTH_IDENTIFIER,
                constants::GCP_IAM_AUTH_IDENTIFIER,
                constants::GCP_ID_TOKEN_AUTH_IDENTIFIER,
                constants::AZURE_AUTH_IDENTIFIER,
            ]
        );
        assert_eq!(registry.len(), 7);
        assert_eq!(
            registry.get(constants::AZURE_AUTH_IDENTIFIER).map(|m| m.login),
            Some(LoginEndpoint::Azure)
        );
        assert!(registry.get("aws-iam").is_none());
    }

    #[tokio::test]
    async fn test_standard_registry_reads_env_snapshot() {
        let env = EnvSnapshot::from_pairs([(constants::INFISICAL_TOKEN_NAME, "st.token")]);
        let registry = AuthMethodRegistry::standard(&env, &Config::default()).unwrap();

        let service = registry.get(constants::SERVICE_TOKEN_IDENTIFIER).unwrap();
        assert!(service.source.is_configured().await);

        let universal = registry.get(constants::UNIVERSAL_AUTH_IDENTIFIER).unwrap();
        assert!(!universal.source.is_configured().await);
    }

    #[tokio::test]
    async fn test_first_configured_follows_precedence() {
        let env = EnvSnapshot::from_pairs([
            (constants::INFISICAL_TOKEN_NAME, "st.token"),
            (constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_ID_NAME, "client-id"),
            (constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET_NAME, "client-secret"),
        ]);
        let registry = AuthMethodRegistry::standard(&env, &Config::default()).unwrap();
        let first = registry.first_configured().await.unwrap();
        assert_eq!(first.identifier, constants::SERVICE_TOKEN_IDENTIFIER);

        let registry = AuthMethodRegistry::new(vec![env_method("only", 10)]).unwrap();
        assert!(registry.first_configured().await.is_none());
    }

    #[test]
    fn test_fingerprint_changes_with_credential() {
        let snapshot = |client_id: &str| {
            EnvSnapshot::from_pairs([
                (constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_ID_NAME, client_id),
                (constants::INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET_NAME, "client-secret"),
            ])
        };
        let config = Config::default();
        let a = AuthMethodRegistry::standard(&snapshot("project-a"), &config).unwrap();
        let a_again = AuthMethodRegistry::standard(&snapshot("project-a"), &config).unwrap();
        let b = AuthMethodRegistry::standard(&snapshot("project-b"), &config).unwrap();

        let fingerprint = |r: &AuthMethodRegistry| {
            r.get(constants::UNIVERSAL_AUTH_IDENTIFIER).unwrap().fingerprint()
        };
        assert_eq!(fingerprint(&a), fingerprint(&a_again));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);

        // Same credential under a different method never matches
        assert_ne!(
            a.fingerprints()[constants::UNIVERSAL_AUTH_IDENTIFIER],
            a.fingerprints()[constants::SERVICE_TOKEN_IDENTIFIER]
        );
    }
}
