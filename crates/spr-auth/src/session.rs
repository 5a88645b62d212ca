//! Authenticated session
//!
//! A session is built once per authenticated identity from a
//! [`GrantRequest`]:
//!
//! - `AuthorizationCode` / `Password`: run the grant, then overwrite the
//!   stored record for `(environment, key)` with the result.
//! - `Reuse`: copy a stored record selected by a [`ReuseSelector`].
//!
//! Once built, the session only changes through [`AuthSession::refresh`].
//! Expiry is tracked but never acted on here: refresh is reactive (a 401
//! from the gateway) or explicit.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use tracing::{info, warn};

use crate::credentials::{CredentialMap, CredentialRecord, CredentialStore};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::token::{ClientApp, TokenExchange, TokenGrant};

/// How the caller wants the session established.
#[derive(Debug, Clone)]
pub enum GrantRequest {
    /// Complete the browser flow with a one-time authorization code.
    AuthorizationCode {
        environment: Environment,
        app: ClientApp,
        code: String,
    },
    /// Resource-owner password grant.
    Password {
        environment: Environment,
        app: ClientApp,
        username: String,
        password: Secret<String>,
    },
    /// Reuse tokens already in the credential store.
    Reuse(ReuseSelector),
}

/// Selects a stored record by whichever of environment and key is given.
///
/// Exactly one stored record must match. With both unset this means the
/// store must hold a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReuseSelector {
    pub environment: Option<Environment>,
    pub key: Option<String>,
}

impl ReuseSelector {
    pub fn exact(environment: impl Into<Environment>, key: impl Into<String>) -> Self {
        Self {
            environment: Some(environment.into()),
            key: Some(key.into()),
        }
    }

    /// Resolve against a loaded map.
    pub fn resolve(&self, map: &CredentialMap) -> Result<(Environment, String, CredentialRecord)> {
        let mut matches = map
            .iter()
            .filter(|(env, _)| self.environment.as_ref().is_none_or(|want| want.as_str() == env.as_str()))
            .flat_map(|(env, keys)| keys.iter().map(move |(key, record)| (env, key, record)))
            .filter(|(_, key, _)| self.key.as_ref().is_none_or(|want| want == *key));

        let Some((env, key, record)) = matches.next() else {
            return Err(Error::CredentialsNotFound {
                environment: self.environment_label(),
                key: self.key.clone().unwrap_or_else(|| "<any>".into()),
            });
        };

        let others: Vec<String> = matches.map(|(e, k, _)| format!("{e}/{k}")).collect();
        if !others.is_empty() {
            return Err(Error::AmbiguousCredentials(format!(
                "{env}/{key}, {}",
                others.join(", ")
            )));
        }

        Ok((Environment::from(env.as_str()), key.clone(), record.clone()))
    }

    fn environment_label(&self) -> String {
        self.environment
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "<any>".into())
    }
}

/// Live credentials for one (environment, key) identity.
pub struct AuthSession {
    environment: Environment,
    app: ClientApp,
    access_token: Secret<String>,
    refresh_token: Secret<String>,
    expires_at: u64,
    store: Arc<CredentialStore>,
    exchange: Arc<dyn TokenExchange>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("environment", &self.environment)
            .field("key", &self.app.key)
            .field("access_token", &self.access_token)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Build a session, running a grant or reading the store as requested.
    pub async fn establish(
        request: GrantRequest,
        store: Arc<CredentialStore>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Result<Self> {
        match request {
            GrantRequest::AuthorizationCode {
                environment,
                app,
                code,
            } => {
                let grant = exchange
                    .exchange_authorization_code(&environment, &app, &code)
                    .await?;
                Self::from_grant(environment, app, grant, store, exchange, "authorization_code").await
            }
            GrantRequest::Password {
                environment,
                app,
                username,
                password,
            } => {
                let grant = exchange
                    .exchange_password(&environment, &app, &username, &password)
                    .await?;
                Self::from_grant(environment, app, grant, store, exchange, "password").await
            }
            GrantRequest::Reuse(selector) => {
                let map = store.load().await?;
                let (environment, key, record) = selector.resolve(&map)?;
                info!(environment = %environment, key = %key, "reusing stored credentials");
                Ok(Self {
                    environment,
                    app: ClientApp {
                        key,
                        secret: record.secret,
                        redirect_uri: record.redirect_uri,
                    },
                    access_token: record.access_token,
                    refresh_token: record.refresh_token,
                    expires_at: record.expires_at,
                    store,
                    exchange,
                })
            }
        }
    }

    async fn from_grant(
        environment: Environment,
        app: ClientApp,
        grant: TokenGrant,
        store: Arc<CredentialStore>,
        exchange: Arc<dyn TokenExchange>,
        flow: &str,
    ) -> Result<Self> {
        let session = Self {
            expires_at: now_secs().saturating_add(grant.expires_in),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            environment,
            app,
            store,
            exchange,
        };
        session
            .store
            .upsert(&session.environment, &session.app.key, session.record())
            .await?;
        info!(
            environment = %session.environment,
            key = %session.app.key,
            flow,
            expires_at = session.expires_at,
            "stored new grant"
        );
        Ok(session)
    }

    /// Exchange the refresh token for a new token pair and persist it.
    ///
    /// The rotated tokens are persisted before the session adopts them. On
    /// failure the session keeps its previous (likely stale) tokens.
    pub async fn refresh(&mut self) -> Result<()> {
        let grant = match self
            .exchange
            .exchange_refresh_token(&self.environment, &self.app, &self.refresh_token)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                warn!(environment = %self.environment, key = %self.app.key, error = %e, "token refresh failed");
                return Err(e);
            }
        };

        let rotated = CredentialRecord {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: now_secs().saturating_add(grant.expires_in),
            ..self.record()
        };
        self.store
            .save_rotated(&self.environment, &self.app.key, rotated.clone())
            .await?;

        self.access_token = rotated.access_token;
        self.refresh_token = rotated.refresh_token;
        self.expires_at = rotated.expires_at;
        info!(environment = %self.environment, key = %self.app.key, expires_at = self.expires_at, "refreshed access token");
        Ok(())
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn key(&self) -> &str {
        &self.app.key
    }

    pub fn redirect_uri(&self) -> &str {
        &self.app.redirect_uri
    }

    pub fn access_token(&self) -> &Secret<String> {
        &self.access_token
    }

    /// Absolute expiry, unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the access token expires within `skew_secs` from now.
    /// Informational; the session never refreshes on its own.
    pub fn is_expired(&self, skew_secs: u64) -> bool {
        now_secs().saturating_add(skew_secs) >= self.expires_at
    }

    /// The durable form of this session.
    pub fn record(&self) -> CredentialRecord {
        CredentialRecord {
            secret: self.app.secret.clone(),
            redirect_uri: self.app.redirect_uri.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
