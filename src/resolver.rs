// Credential resolution
//
// Walks the auth methods in precedence order and turns the first usable
// credential into a session:
//
//   Idle -> Probing(method) -> Exchanging(method) -> Resolved | Exhausted
//
// A valid cached session short-circuits straight to Resolved. A method that
// fails while exchanging sends the walk back to Probing at the next method.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthMethod, AuthMethodRegistry, EnvSnapshot, Session, SessionStore, TokenExchanger};
use crate::cache::SessionCache;
use crate::config::Config;
use crate::error::{AuthError, Result};

/// Produces a valid session from whichever auth method is configured
pub struct CredentialResolver {
    registry: AuthMethodRegistry,
    exchanger: TokenExchanger,
    cache: Arc<SessionCache>,
}

impl CredentialResolver {
    pub fn new(registry: AuthMethodRegistry, exchanger: TokenExchanger, cache: Arc<SessionCache>) -> Self {
        Self {
            registry,
            exchanger,
            cache,
        }
    }

    /// Build the standard resolver and seed it from the session file, if any
    pub async fn from_config(config: &Config, env: &EnvSnapshot) -> Result<Self> {
        let registry = AuthMethodRegistry::standard(env, config)?;
        let exchanger = TokenExchanger::new(config)?;

        let cache = match config.session_file {
            Some(ref path) => {
                let cache = SessionCache::with_store(SessionStore::new(path), registry.fingerprints());
                if path.exists() {
                    // Only the method resolution would pick now may reuse its session
                    let expected = registry
                        .first_configured()
                        .await
                        .map(|method| method.identifier.as_str());
                    if let Err(e) = cache.load_persisted(expected).await {
                        tracing::warn!(error = %e, "Could not load persisted session");
                    }
                }
                cache
            }
            None => SessionCache::new(),
        };

        Ok(Self::new(registry, exchanger, Arc::new(cache)))
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn registry(&self) -> &AuthMethodRegistry {
        &self.registry
    }

    /// Return a valid session, exchanging a credential if none is cached
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<Session> {
        if let Some(session) = self.cache.get().await {
            tracing::debug!(method = %session.method, "Using cached session");
            return Ok(session);
        }

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = self.cache.single_flight(|| self.resolve_uncached(cancel)) => result,
        }
    }

    /// Forget the current session (memory and file)
    pub async fn logout(&self) -> Result<()> {
        self.cache.invalidate().await
    }

    async fn resolve_uncached(&self, cancel: &CancellationToken) -> Result<Session> {
        let mut attempted: Vec<String> = Vec::new();
        let mut last_error: Option<AuthError> = None;

        for method in self.registry.in_order() {
            tracing::debug!(method = %method.identifier, "Probing auth method");

            let configured = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                configured = method.source.is_configured() => configured,
            };
            if !configured {
                continue;
            }

            attempted.push(method.identifier.clone());

            match self.exchange_with(method, cancel).await {
                Ok(session) => {
                    tracing::info!(method = %method.identifier, "Authenticated");
                    return Ok(session);
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        method = %method.identifier,
                        error = %e,
                        "Auth method failed, trying next"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // The sole configured method hit a network problem; report it as is
        if attempted.len() == 1 {
            if let Some(err @ AuthError::TransientNetwork { .. }) = last_error {
                return Err(err);
            }
        }

        tracing::error!(attempted = ?attempted, "No auth method succeeded");
        Err(AuthError::NoAuthMethodConfigured {
            attempted,
            last_error: last_error.map(Box::new),
        })
    }

    async fn exchange_with(&self, method: &AuthMethod, cancel: &CancellationToken) -> Result<Session> {
        let cred = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
            cred = method.source.read() => cred?,
        };

        self.exchanger.exchange(&cred, method, cancel).await
    }
}
