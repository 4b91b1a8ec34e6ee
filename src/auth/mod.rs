// Authentication module
// Credential sources, auth method registry, exchange and session persistence

mod credentials;
mod exchange;
mod registry;
mod store;
mod types;

pub use credentials::{
    CloudMetadataSource, CloudProvider, CredentialSource, EnvSnapshot, EnvironmentSource,
    FilePathSource, KubernetesTokenSource,
};
pub use exchange::TokenExchanger;
pub use registry::{AuthMethod, AuthMethodRegistry};
pub use store::{FileLock, SessionStore, StoredSession};
pub use types::{CredentialKind, LoginEndpoint, RawCredential, SecretToken, Session};
