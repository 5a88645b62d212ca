//! High-level client wiring store, token exchange, session and gateway

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use spr_auth::{
    AuthSession, CredentialStore, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, GrantRequest,
    HttpTokenExchange,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::gateway::RequestGateway;
use crate::request::ApiRequest;

/// Connection settings shared by the token exchange and the gateway.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Applied to every token exchange and API call
    pub timeout: Duration,
    /// Credential file; `None` uses `~/.sprinklr/credentials.json`
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            credentials_path: None,
        }
    }
}

impl ClientSettings {
    /// Open the credential store these settings point at.
    pub async fn open_store(&self) -> Result<CredentialStore> {
        let store = match &self.credentials_path {
            Some(path) => CredentialStore::open(path.clone()).await?,
            None => CredentialStore::open_default().await?,
        };
        Ok(store)
    }
}

/// An authenticated client for one identity.
pub struct Client {
    gateway: RequestGateway,
    store: Arc<CredentialStore>,
}

impl Client {
    /// Open the configured store and establish a session from `grant`.
    pub async fn connect(settings: &ClientSettings, grant: GrantRequest) -> Result<Self> {
        let store = Arc::new(settings.open_store().await?);
        Self::connect_with_store(settings, grant, store).await
    }

    /// Establish a session against an already opened store.
    pub async fn connect_with_store(
        settings: &ClientSettings,
        grant: GrantRequest,
        store: Arc<CredentialStore>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        let exchange = Arc::new(HttpTokenExchange::with_client(
            http.clone(),
            settings.base_url.clone(),
        ));
        let session = AuthSession::establish(grant, store.clone(), exchange).await?;
        info!(
            environment = %session.environment(),
            key = session.key(),
            store = %store.location(),
            "client session ready"
        );

        let gateway = RequestGateway::with_client(
            http,
            Arc::new(Mutex::new(session)),
            settings.base_url.clone(),
        );
        Ok(Self { gateway, store })
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Shorthand for [`RequestGateway::call`].
    pub async fn request(&self, request: &ApiRequest) -> Result<Value> {
        self.gateway.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spr_auth::{ClientApp, Environment, ReuseSelector};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, dir: &tempfile::TempDir) -> ClientSettings {
        ClientSettings {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            credentials_path: Some(dir.path().join("creds").join("credentials.json")),
        }
    }

    #[test]
    fn defaults_point_at_production_host() {
        let settings = ClientSettings::default();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(settings.credentials_path.is_none());
    }

    #[tokio::test]
    async fn password_login_then_reuse_from_new_process() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qa4/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A",
                "refresh_token": "R",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/qa4/api/v2/me"))
            .and(header("authorization", "Bearer A"))
            .and(header("key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 7}})))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&server, &dir);

        let client = Client::connect(
            &settings,
            GrantRequest::Password {
                environment: Environment::from("qa4"),
                app: ClientApp::new("k1", "s", "r"),
                username: "u".into(),
                password: "p".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(client.request(&ApiRequest::get("me")).await.unwrap(), json!({"id": 7}));

        // A later client picks the stored tokens up without a grant
        let reused = Client::connect(&settings, GrantRequest::Reuse(ReuseSelector::default()))
            .await
            .unwrap();
        assert_eq!(reused.request(&ApiRequest::get("me")).await.unwrap(), json!({"id": 7}));
        assert_eq!(reused.store().load().await.unwrap()["qa4"].len(), 1);
    }

    #[tokio::test]
    async fn reuse_with_empty_store_fails() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let result = Client::connect(
            &settings(&server, &dir),
            GrantRequest::Reuse(ReuseSelector::default()),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::Auth(spr_auth::Error::CredentialsNotFound { .. }))
        ));
    }
}
