//! Authenticated request path
//!
//! Every call resolves `{base}[{env}/]api/v2/{endpoint}`, injects the
//! session's bearer token and application key, and unwraps the
//! `{data, errors}` envelope. A 401 triggers exactly one refresh followed by
//! exactly one retry; nothing else is retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use spr_auth::AuthSession;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, Result};
use crate::request::ApiRequest;

/// Application key header expected next to the bearer token.
pub const KEY_HEADER: &str = "key";

/// Sends authenticated API calls on behalf of one session.
///
/// The session lock is held for the whole call, so calls sharing a session
/// run one at a time and a refresh always completes before the retry reads
/// the new token.
pub struct RequestGateway {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Mutex<AuthSession>>,
}

impl RequestGateway {
    pub fn new(
        session: Arc<Mutex<AuthSession>>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(http, session, base_url))
    }

    pub fn with_client(
        http: reqwest::Client,
        session: Arc<Mutex<AuthSession>>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<Mutex<AuthSession>> {
        &self.session
    }

    /// Issue `request` and return the envelope's `data`.
    #[instrument(skip_all, fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn call(&self, request: &ApiRequest) -> Result<Value> {
        let mut session = self.session.lock().await;
        let url = session
            .environment()
            .api_url(&self.base_url, &request.endpoint);

        let mut response = self.send(&url, request, &session).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            info!(environment = %session.environment(), key = session.key(), "access token rejected, refreshing");
            session.refresh().await?;
            response = self.send(&url, request, &session).await?;
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_transport("reading response body", e))?;
        debug!(%status, bytes = body.len(), "received response");

        unwrap_envelope(status, &url, request, body)
    }

    async fn send(
        &self,
        url: &str,
        request: &ApiRequest,
        session: &AuthSession,
    ) -> Result<reqwest::Response> {
        let headers = auth_headers(request, session)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .send()
            .await
            .map_err(|e| Error::from_transport(&format!("{} {url}", request.method), e))
    }
}

/// Caller headers plus `Authorization` and `Key` unless already present.
fn auth_headers(request: &ApiRequest, session: &AuthSession) -> Result<HeaderMap> {
    let mut headers = request.headers.clone();
    if !headers.contains_key(AUTHORIZATION) {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", session.access_token().expose()))
            .map_err(|e| Error::InvalidHeader(format!("authorization: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
    }
    let key_header = HeaderName::from_static(KEY_HEADER);
    if !headers.contains_key(&key_header) {
        let key = HeaderValue::from_str(session.key())
            .map_err(|e| Error::InvalidHeader(format!("key: {e}")))?;
        headers.insert(key_header, key);
    }
    Ok(headers)
}

fn unwrap_envelope(status: StatusCode, url: &str, request: &ApiRequest, body: String) -> Result<Value> {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(_) => {
            error!(%status, url, request_body = ?request.body, response = %body, "non-JSON response");
            return Err(Error::MalformedResponse {
                status: status.as_u16(),
                body,
            });
        }
    };

    if let Some(errors) = payload.get("errors").filter(|e| !is_blank(e)) {
        error!(%status, url, request_body = ?request.body, errors = %errors, "API returned errors");
        return Err(Error::Api(errors.clone()));
    }

    match payload {
        Value::Object(mut fields) if fields.contains_key("data") => {
            Ok(fields.remove("data").unwrap_or(Value::Null))
        }
        _ => Err(Error::MalformedResponse {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Null, empty collections, empty strings, `false` and zero count as no errors.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
