//! Configuration management for tether

mod node;
pub mod serde_utils;
mod worker;

pub use node::{BackoffConfig, NodeConfig};
pub use worker::{ForwardConfig, RemoteConfig};

use crate::auth::App;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("tether.toml")
}

/// Everything the `tether` binary reads from its config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings
    pub node: NodeConfig,

    /// Certificate material and verification policy
    pub tls: TlsSettings,

    /// Logging
    pub log: LogConfig,

    /// Backoff between reconnect attempts of remote workers
    pub backoff: BackoffConfig,

    /// Apps allowed to connect to this node. The listener only runs when
    /// this is non-empty.
    pub apps: Vec<App>,

    /// Outbound connections to keep alive
    pub remotes: Vec<RemoteConfig>,

    /// Local port forwards
    pub forwards: Vec<ForwardConfig>,
}

impl Config {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate()?;
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::Invalid(
                "backoff.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        for forward in &self.forwards {
            if forward.app.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "forward on {} has no app",
                    forward.local_address
                )));
            }
        }
        Ok(())
    }
}

/// TLS material
///
/// The certificate is presented when accepting connections. When dialing,
/// the peer is verified against `ca` if set, otherwise the bundled web PKI
/// roots, unless `skip_verify` is on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM certificate chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    /// Extra PEM root certificates trusted when dialing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,

    /// Server name to verify; defaults to the host part of the dialed address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Accept any server certificate when dialing
    pub skip_verify: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Load `path`, or write the default configuration there if it is missing
///
/// Returns the configuration and whether a new file was written.
pub fn load_or_init_config(path: &Path) -> Result<(Config, bool), ConfigError> {
    match load_config::<Config>(path) {
        Ok(config) => {
            config.validate()?;
            Ok((config, false))
        }
        Err(ConfigError::NotFound(_)) => {
            let config = Config::default();
            save_config(path, &config)?;
            tracing::info!("Wrote default config to {}", path.display());
            Ok((config, true))
        }
        Err(e) => Err(e),
    }
}
