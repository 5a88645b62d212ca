//! Error types for authenticated API calls

/// Errors from the request gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session establishment or the 401-triggered refresh failed.
    #[error(transparent)]
    Auth(#[from] spr_auth::Error),

    /// Response body was not the JSON `{data, errors}` envelope, typically an
    /// HTML/text error page from intermediate infrastructure.
    #[error("malformed response ({status}): {body}")]
    MalformedResponse { status: u16, body: String },

    /// Well-formed response with a non-empty `errors` field.
    #[error("API returned errors: {0}")]
    Api(serde_json::Value),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl Error {
    pub(crate) fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{context}: {err}"))
        } else {
            Error::Http(format!("{context}: {err}"))
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
