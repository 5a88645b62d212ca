//! OAuth token exchange
//!
//! Handles the three token endpoint interactions:
//! 1. Authorization code exchange (browser flow completion)
//! 2. Resource-owner password exchange
//! 3. Refresh-token exchange (reactive refresh after a 401)
//!
//! All three POST a form-encoded body to `{base}[{env}/]oauth/token` and
//! expect `{access_token, refresh_token, expires_in}` back on 200.

use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::BoxFuture;
use crate::environment::Environment;
use crate::error::{Error, Result};

/// Application credentials registered with the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientApp {
    /// Application client id; also the store key
    pub key: String,
    pub secret: Secret<String>,
    pub redirect_uri: String,
}

impl ClientApp {
    pub fn new(
        key: impl Into<String>,
        secret: impl Into<Secret<String>>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

/// Normalized token endpoint response.
///
/// `expires_in` is a delta in seconds from the response time; the session
/// turns it into an absolute timestamp before storing.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_in: u64,
}

/// Performs the grant exchanges against the token endpoint.
///
/// Uses `Pin<Box<dyn Future>>` return types so sessions can share an
/// `Arc<dyn TokenExchange>`.
pub trait TokenExchange: Send + Sync {
    fn exchange_authorization_code<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenGrant>>;

    fn exchange_password<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        username: &'a str,
        password: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenGrant>>;

    fn exchange_refresh_token<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        refresh_token: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenGrant>>;
}

/// Token exchange over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenExchange {
    /// Build an exchange with its own client and a bounded request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client (its timeout applies).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post_grant(
        &self,
        environment: &Environment,
        grant_type: &'static str,
        params: Vec<(&'static str, &str)>,
    ) -> Result<TokenGrant> {
        let url = environment.token_url(&self.base_url);
        let mut form = Vec::with_capacity(params.len() + 1);
        form.push(("grant_type", grant_type));
        form.extend(params);

        debug!(environment = %environment, grant_type, %url, "requesting token");

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::from_transport(&format!("{grant_type} grant request"), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_transport(&format!("{grant_type} grant response"), e))?;

        if status != reqwest::StatusCode::OK {
            warn!(environment = %environment, grant_type, %status, "token endpoint rejected grant");
            return Err(Error::TokenExchangeFailed(format!(
                "{grant_type} grant returned {status}: {body}"
            )));
        }

        serde_json::from_str::<TokenGrant>(&body).map_err(|e| {
            Error::TokenExchangeFailed(format!("invalid {grant_type} grant response: {e}: {body}"))
        })
    }
}

impl TokenExchange for HttpTokenExchange {
    fn exchange_authorization_code<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenGrant>> {
        Box::pin(self.post_grant(
            environment,
            "authorization_code",
            vec![
                ("client_id", app.key.as_str()),
                ("client_secret", app.secret.expose().as_str()),
                ("redirect_uri", app.redirect_uri.as_str()),
                ("code", code),
            ],
        ))
    }

    fn exchange_password<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        username: &'a str,
        password: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenGrant>> {
        Box::pin(self.post_grant(
            environment,
            "password",
            vec![
                ("client_id", app.key.as_str()),
                ("client_secret", app.secret.expose().as_str()),
                ("username", username),
                ("password", password.expose().as_str()),
            ],
        ))
    }

    fn exchange_refresh_token<'a>(
        &'a self,
        environment: &'a Environment,
        app: &'a ClientApp,
        refresh_token: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<TokenGrant>> {
        // The form encoder percent-encodes the refresh token value.
        Box::pin(self.post_grant(
            environment,
            "refresh_token",
            vec![
                ("client_id", app.key.as_str()),
                ("client_secret", app.secret.expose().as_str()),
                ("redirect_uri", app.redirect_uri.as_str()),
                ("refresh_token", refresh_token.expose().as_str()),
            ],
        ))
    }
}
