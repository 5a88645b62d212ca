//! Platform endpoint constants
//!
//! Paths are relative to the environment-qualified base URL, see
//! [`crate::Environment::base_url`].

/// Default API host. Every environment other than production lives under a
/// path segment of this host.
pub const DEFAULT_BASE_URL: &str = "https://api2.sprinklr.com/";

/// Environment tag that maps to the root of the base URL.
pub const PRODUCTION_ENVIRONMENT: &str = "prod";

/// Token endpoint for all three grant types
pub const OAUTH_TOKEN_PATH: &str = "oauth/token";

/// Browser authorization page for the authorization-code flow
pub const OAUTH_AUTHORIZE_PATH: &str = "oauth/authorize";

/// Prefix of every authenticated REST endpoint
pub const API_PATH: &str = "api/v2/";

/// Directory under the user's home holding the credential file
pub const CREDENTIALS_DIR: &str = ".sprinklr";

/// Credential file name inside [`CREDENTIALS_DIR`]
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Request timeout applied when the caller does not configure one
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
