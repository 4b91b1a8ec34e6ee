// Error handling module
// Defines the error taxonomy for credential resolution

use thiserror::Error;

/// Errors that can occur while resolving a session
///
/// The type is `Clone` so a single exchange outcome can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Required inputs for a credential source are missing or unreachable
    #[error("Credential source unavailable ({origin}): {reason}")]
    SourceUnavailable { origin: String, reason: String },

    /// Credential material exists but cannot be parsed
    #[error("Malformed credential ({origin}): {reason}")]
    MalformedCredential { origin: String, reason: String },

    /// Backend rejected the credential
    #[error("Invalid credential for {method}: {status} - {message}")]
    InvalidCredential {
        method: String,
        status: u16,
        message: String,
    },

    /// Network failure that persisted through every retry
    #[error("Network error for {method} after {attempts} attempt(s): {message}")]
    TransientNetwork {
        method: String,
        attempts: u32,
        message: String,
    },

    /// Every configured method was tried, or none was configured
    #[error("{}", describe_exhausted(.attempted, .last_error.as_deref()))]
    NoAuthMethodConfigured {
        attempted: Vec<String>,
        last_error: Option<Box<AuthError>>,
    },

    /// Resolution was aborted by the caller
    #[error("Authentication cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session persistence failed
    #[error("Session store error: {0}")]
    Store(String),
}

impl AuthError {
    /// Whether the resolver may move on to the next method after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::SourceUnavailable { .. }
                | AuthError::MalformedCredential { .. }
                | AuthError::InvalidCredential { .. }
                | AuthError::TransientNetwork { .. }
        )
    }

    pub(crate) fn unavailable(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthError::SourceUnavailable {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthError::MalformedCredential {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

fn describe_exhausted(attempted: &[String], last_error: Option<&AuthError>) -> String {
    if attempted.is_empty() {
        return "No authentication method configured".to_string();
    }

    let mut message = format!(
        "No authentication method succeeded (attempted: {})",
        attempted.join(", ")
    );
    if let Some(err) = last_error {
        message.push_str(&format!("; last error: {}", err));
    }
    message
}

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, AuthError>;
