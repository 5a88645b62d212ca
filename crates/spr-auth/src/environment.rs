//! Environment tags and URL construction
//!
//! An environment is a deployment partition of the platform (`prod`, `qa4`,
//! ...). Production sits at the root of the base URL; every other tag is
//! inserted as a path segment in front of the OAuth or API path.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{API_PATH, OAUTH_AUTHORIZE_PATH, OAUTH_TOKEN_PATH, PRODUCTION_ENVIRONMENT};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn production() -> Self {
        Self(PRODUCTION_ENVIRONMENT.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        self.0 == PRODUCTION_ENVIRONMENT
    }

    /// Base URL qualified for this environment, always ending in `/`.
    pub fn base_url(&self, base: &str) -> String {
        let mut url = base.trim_end_matches('/').to_owned();
        url.push('/');
        if !self.is_production() {
            url.push_str(self.0.trim_matches('/'));
            url.push('/');
        }
        url
    }

    /// `{base}[{env}/]oauth/token`
    pub fn token_url(&self, base: &str) -> String {
        format!("{}{OAUTH_TOKEN_PATH}", self.base_url(base))
    }

    /// `{base}[{env}/]oauth/authorize`
    pub fn authorize_url(&self, base: &str) -> String {
        format!("{}{OAUTH_AUTHORIZE_PATH}", self.base_url(base))
    }

    /// `{base}[{env}/]api/v2/{endpoint}`
    pub fn api_url(&self, base: &str, endpoint: &str) -> String {
        format!(
            "{}{API_PATH}{}",
            self.base_url(base),
            endpoint.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Environment {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Environment {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}
