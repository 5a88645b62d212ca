//! Browser authorization URL for the authorization-code flow
//!
//! The user opens this URL, approves the application and is redirected to
//! `redirect_uri` with a one-time `code`. That code is then completed with
//! [`crate::GrantRequest::AuthorizationCode`].

use crate::environment::Environment;
use crate::error::{Error, Result};

/// `{base}[{env}/]oauth/authorize?client_id=..&response_type=code&redirect_uri=..`
///
/// Parameter values are percent-encoded.
pub fn build_authorization_url(
    base_url: &str,
    environment: &Environment,
    client_id: &str,
    redirect_uri: &str,
) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        &environment.authorize_url(base_url),
        &[
            ("client_id", client_id),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
        ],
    )
    .map_err(|e| Error::Http(format!("invalid authorization URL: {e}")))?;
    Ok(url.into())
}
