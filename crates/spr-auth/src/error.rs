//! Error types for credential storage and OAuth operations

/// Errors from credential storage, token exchange and session handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("incomplete credential record: {0}")]
    IncompleteRecord(String),

    #[error("credential store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error(
        "access token not found for key {key} in environment {environment}; \
         run `spr password-auth` or `spr oauth` to complete the authorization"
    )]
    CredentialsNotFound { environment: String, key: String },

    #[error("several stored credentials match, pass an explicit environment and key: {0}")]
    AmbiguousCredentials(String),

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential store is locked by another writer: {0}")]
    StoreBusy(String),
}

impl Error {
    /// Classify a transport-level reqwest failure.
    pub(crate) fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{context}: {err}"))
        } else {
            Error::Http(format!("{context}: {err}"))
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
