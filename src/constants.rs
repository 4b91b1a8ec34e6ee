// Fixed names shared by the CLI and the credential resolver

pub const CONFIG_FOLDER_NAME: &str = ".infisical";
pub const INFISICAL_DEFAULT_API_URL: &str = "https://app.infisical.com/api";

/// Session file kept next to the CLI config between invocations
pub const SESSION_FILE_NAME: &str = "session.json";

// Service token and pre-issued access token
pub const INFISICAL_TOKEN_NAME: &str = "INFISICAL_TOKEN";
pub const INFISICAL_UNIVERSAL_AUTH_ACCESS_TOKEN_NAME: &str = "INFISICAL_UNIVERSAL_AUTH_ACCESS_TOKEN";

// Universal Auth
pub const INFISICAL_UNIVERSAL_AUTH_CLIENT_ID_NAME: &str = "INFISICAL_UNIVERSAL_AUTH_CLIENT_ID";
pub const INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET_NAME: &str =
    "INFISICAL_UNIVERSAL_AUTH_CLIENT_SECRET";

// Kubernetes auth
pub const INFISICAL_KUBERNETES_SERVICE_ACCOUNT_TOKEN_NAME: &str =
    "INFISICAL_KUBERNETES_SERVICE_ACCOUNT_TOKEN_PATH";
pub const DEFAULT_KUBERNETES_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

// GCP auth
pub const INFISICAL_GCP_IAM_SERVICE_ACCOUNT_KEY_FILE_PATH_NAME: &str =
    "INFISICAL_GCP_IAM_SERVICE_ACCOUNT_KEY_FILE_PATH";

/// Generic variable for auth methods that need a machine identity ID
pub const INFISICAL_MACHINE_IDENTITY_ID_NAME: &str = "INFISICAL_MACHINE_IDENTITY_ID";

// Auth method identifiers
pub const SERVICE_TOKEN_IDENTIFIER: &str = "service-token";
pub const UNIVERSAL_AUTH_TOKEN_IDENTIFIER: &str = "universal-auth-token";
pub const UNIVERSAL_AUTH_IDENTIFIER: &str = "universal-auth";
pub const KUBERNETES_AUTH_IDENTIFIER: &str = "kubernetes";
pub const GCP_IAM_AUTH_IDENTIFIER: &str = "gcp-iam";
pub const GCP_ID_TOKEN_AUTH_IDENTIFIER: &str = "gcp-id-token";
pub const AZURE_AUTH_IDENTIFIER: &str = "azure";

pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
