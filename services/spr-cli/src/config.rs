//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The config file is optional; a missing file at the default location
//! yields defaults, a missing file the user pointed at is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use spr_auth::{CREDENTIALS_DIR, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use spr_client::ClientSettings;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub store: StoreConfig,
}

/// Platform API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Credential store location
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Credential file; unset means `~/.sprinklr/credentials.json`
    pub path: Option<PathBuf>,
}

/// Where the config path came from, which decides whether absence is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub explicit: bool,
}

impl Config {
    /// Load from `source`, then overlay environment variables.
    ///
    /// Not validated yet: CLI flags may still replace a bad value, so
    /// validation happens in [`Config::with_overrides`].
    pub fn load(source: &ConfigSource) -> common::Result<Self> {
        let mut config = if source.path.exists() || source.explicit {
            let contents =
                std::fs::read_to_string(&source.path).map_err(|e| common::Error::Read {
                    path: source.path.clone(),
                    source: e,
                })?;
            toml::from_str(&contents).map_err(|e| common::Error::Parse {
                path: source.path.clone(),
                source: e,
            })?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("SPR_BASE_URL") {
            config.api.base_url = url;
        }
        if let Ok(path) = std::env::var("SPR_CREDENTIALS_PATH") {
            config.store.path = Some(PathBuf::from(path));
        }
        if let Ok(secs) = std::env::var("SPR_TIMEOUT_SECS") {
            config.api.timeout_secs = secs.trim().parse().map_err(|e| common::Error::InvalidEnv {
                var: "SPR_TIMEOUT_SECS",
                reason: format!("must be an integer: {e}"),
            })?;
        }

        Ok(config)
    }

    /// Apply CLI flags, which win over everything else, and validate the
    /// merged result.
    pub fn with_overrides(
        mut self,
        base_url: Option<String>,
        store: Option<PathBuf>,
    ) -> common::Result<Self> {
        if let Some(url) = base_url {
            self.api.base_url = url;
        }
        if let Some(path) = store {
            self.store.path = Some(path);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            credentials_path: self.store.path.clone(),
        }
    }

    /// Resolve config file path from CLI arg, SPR_CONFIG_PATH, or
    /// `~/.sprinklr/config.toml`.
    pub fn resolve_path(cli_path: Option<&Path>) -> ConfigSource {
        if let Some(p) = cli_path {
            return ConfigSource {
                path: p.to_path_buf(),
                explicit: true,
            };
        }
        if let Ok(p) = std::env::var("SPR_CONFIG_PATH") {
            return ConfigSource {
                path: PathBuf::from(p),
                explicit: true,
            };
        }
        let dir = dirs::home_dir()
            .map(|home| home.join(CREDENTIALS_DIR))
            .unwrap_or_else(|| PathBuf::from(CREDENTIALS_DIR));
        ConfigSource {
            path: dir.join("config.toml"),
            explicit: false,
        }
    }
}
