//! File configuration for CLI defaults.
//!
//! The file is TOML; every key is optional and unknown keys are rejected.
//!
//! ```toml
//! username = "s123456"
//! cookie_file = "/home/me/.local/share/politodown/cookies.txt"
//! output_dir = "/home/me/polito"
//! concurrency = 4
//! max_retries = 3
//! connect_timeout_secs = 10
//! read_timeout_secs = 30
//! throttle_delay_ms = 5000
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys or wrong types.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Offending key.
        key: &'static str,
        /// Offending value.
        value: u64,
        /// Accepted range.
        expected: &'static str,
    },
}

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Portal account name.
    pub username: Option<String>,
    /// Netscape cookie file used to persist the session.
    pub cookie_file: Option<PathBuf>,
    /// Root directory of downloads.
    pub output_dir: Option<PathBuf>,
    /// Files saved concurrently (1..=100).
    pub concurrency: Option<u64>,
    /// Retries after a transient failure (0..=10).
    pub max_retries: Option<u64>,
    /// HTTP connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Wait after a throttled answer in milliseconds (0..=60000).
    pub throttle_delay_ms: Option<u64>,
}

impl FileConfig {
    /// Parses and validates a configuration document; `path` is used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::OutOfRange`].
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against their accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency", self.concurrency, 1, 100, "1..=100")?;
        check_range("max_retries", self.max_retries, 0, 10, "0..=10")?;
        check_range(
            "connect_timeout_secs",
            self.connect_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "read_timeout_secs",
            self.read_timeout_secs,
            1,
            3600,
            "1..=3600",
        )?;
        check_range(
            "throttle_delay_ms",
            self.throttle_delay_ms,
            0,
            60_000,
            "0..=60000",
        )?;
        Ok(())
    }
}

fn check_range(
    key: &'static str,
    value: Option<u64>,
    min: u64,
    max: u64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(ConfigError::OutOfRange {
            key,
            value,
            expected,
        }),
        _ => Ok(()),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/politodown/config.toml`
/// 2. `$HOME/.config/politodown/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("politodown")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("politodown")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the configuration.
///
/// An explicit path must exist. Without one, the default path is used when
/// the file is present; otherwise an empty configuration is returned.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed, or validated.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file found, using defaults");
                return Ok(FileConfig::default());
            }
        },
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = FileConfig::from_toml(&raw, &path)?;
    debug!(path = %path.display(), "config file loaded");
    Ok(config)
}
