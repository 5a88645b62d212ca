//! Outbound API request description

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{Error, Result};

/// One call against `api/v2/{endpoint}`.
///
/// Headers given here win over the gateway's injected `Authorization` and
/// `Key` headers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            body: None,
            params: Vec::new(),
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// JSON request body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parts() {
        let request = ApiRequest::post("reports/query")
            .header("Content-Type", "application/json")
            .unwrap()
            .json(serde_json::json!({"page": 1}))
            .query("pageSize", "50");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.endpoint, "reports/query");
        assert_eq!(request.headers["content-type"], "application/json");
        assert_eq!(request.body.unwrap()["page"], 1);
        assert_eq!(request.params, vec![("pageSize".to_string(), "50".to_string())]);
    }

    #[test]
    fn invalid_header_is_rejected() {
        let result = ApiRequest::get("x").header("bad header", "v");
        assert!(matches!(result, Err(Error::InvalidHeader(_))));

        let result = ApiRequest::get("x").header("x-ok", "line\nbreak");
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }
}
