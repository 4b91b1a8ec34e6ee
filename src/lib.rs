// Infisical auth - library root

pub mod auth;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod http_client;
pub mod resolver;

pub use cache::SessionCache;
pub use error::AuthError;
pub use resolver::CredentialResolver;
