use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_pause_timeout() -> f64 {
    60.0
}

fn default_pause_attempts() -> u32 {
    3
}

fn default_join_grace() -> f64 {
    5.0
}

/// Address the control surface listens on. Omit from the configuration to
/// disable the surface entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebApiAddress {
    pub host: String,
    pub port: u16,
}

/// Launcher configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Control surface bind address; `None` disables it.
    #[serde(default)]
    pub web_api_address: Option<WebApiAddress>,

    /// Wall-clock ceiling in seconds; 0 or unset means no limit.
    #[serde(default)]
    pub max_uptime_seconds: f64,

    /// Root directory for persistence records.
    pub states_dir: PathBuf,

    /// Persistence cadence in virtual seconds; 0 saves only on request.
    #[serde(default)]
    pub save_interval_seconds: f64,

    /// Retention count for persistence records; 0 keeps everything.
    #[serde(default)]
    pub max_keep_states: usize,

    /// Record directory (or states root) to restore from at startup.
    #[serde(default)]
    pub resume_from: Option<PathBuf>,

    /// How long a pause waits for every thread to reach quiescence.
    #[serde(default = "default_pause_timeout")]
    pub pause_timeout_seconds: f64,

    /// Retry budget when a pause attempt times out.
    #[serde(default = "default_pause_attempts")]
    pub pause_attempts: u32,

    /// Grace period for joining threads at shutdown.
    #[serde(default = "default_join_grace")]
    pub join_grace_seconds: f64,
}

impl LaunchConfig {
    /// Minimal configuration for embedding and tests: a states directory,
    /// no control surface, save on request only.
    pub fn with_states_dir(states_dir: impl Into<PathBuf>) -> Self {
        Self {
            web_api_address: None,
            max_uptime_seconds: 0.0,
            states_dir: states_dir.into(),
            save_interval_seconds: 0.0,
            max_keep_states: 0,
            resume_from: None,
            pause_timeout_seconds: default_pause_timeout(),
            pause_attempts: default_pause_attempts(),
            join_grace_seconds: default_join_grace(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.states_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("states_dir", "must not be empty"));
        }
        for (option, value) in [
            ("max_uptime_seconds", self.max_uptime_seconds),
            ("save_interval_seconds", self.save_interval_seconds),
            ("pause_timeout_seconds", self.pause_timeout_seconds),
            ("join_grace_seconds", self.join_grace_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(option, "must be a non-negative number"));
            }
        }
        if self.pause_timeout_seconds == 0.0 {
            return Err(ConfigError::invalid("pause_timeout_seconds", "must be positive"));
        }
        if self.pause_attempts == 0 {
            return Err(ConfigError::invalid("pause_attempts", "must be positive"));
        }
        if let Some(address) = &self.web_api_address {
            if address.host.is_empty() {
                return Err(ConfigError::invalid("web_api_address", "host must not be empty"));
            }
        }
        Ok(())
    }

    /// Uptime ceiling as an option; 0 means unlimited.
    pub fn max_uptime(&self) -> Option<f64> {
        (self.max_uptime_seconds > 0.0).then_some(self.max_uptime_seconds)
    }

    /// Save cadence as an option; 0 means on-request only.
    pub fn save_interval(&self) -> Option<f64> {
        (self.save_interval_seconds > 0.0).then_some(self.save_interval_seconds)
    }
}

/// Launch-time failures. These map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{option}: {reason}")]
    InvalidOption { option: &'static str, reason: String },
    #[error("{kind} '{name}' is already registered")]
    DuplicateComponent { kind: &'static str, name: String },
    #[error("unknown {kind} '{name}'")]
    UnknownComponent { kind: &'static str, name: String },
    #[error("an interaction driver is already set")]
    DriverAlreadySet,
    #[error("failed to bind control surface on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    pub fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_uses_defaults() {
        let config: LaunchConfig =
            serde_json::from_str(r#"{ "states_dir": "/tmp/states" }"#).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_uptime(), None);
        assert_eq!(config.save_interval(), None);
        assert_eq!(config.pause_attempts, 3);
        assert!(config.web_api_address.is_none());
    }

    #[test]
    fn negative_interval_is_rejected() {
        let config: LaunchConfig = serde_json::from_str(
            r#"{ "states_dir": "/tmp/states", "save_interval_seconds": -1.0 }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
