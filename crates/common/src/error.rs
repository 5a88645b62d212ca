//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading and validating the `spr` configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {var} {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = Error::Config("base_url must start with http:// or https://".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: base_url must start with http:// or https://"
        );
    }

    #[test]
    fn read_error_names_the_file() {
        let err = Error::Read {
            path: PathBuf::from("/etc/spr/config.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read config file /etc/spr/config.toml: missing"
        );
    }

    #[test]
    fn parse_error_keeps_source() {
        let source = toml::from_str::<toml::Value>("not valid {{{{ toml").unwrap_err();
        let err = Error::Parse {
            path: PathBuf::from("config.toml"),
            source,
        };
        assert!(err.to_string().starts_with("invalid TOML in config.toml:"), "got: {err}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_env_display() {
        let err = Error::InvalidEnv {
            var: "SPR_TIMEOUT_SECS",
            reason: "must be an integer".into(),
        };
        assert_eq!(
            err.to_string(),
            "environment variable SPR_TIMEOUT_SECS must be an integer"
        );
    }
}
