//! CLI configuration.
//!
//! Read from TOML, by default at:
//! - Linux: `~/.config/artifact-connector/cli.toml`
//! - Windows: `%APPDATA%/artifact-connector/cli.toml`
//!
//! A missing file means defaults.

use std::path::{Path, PathBuf};

use artifact_connector::ConnectorConfig;
use artifact_transfer::ChecksumPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Policy for `get` when `--policy` is not given.
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,

    /// Minimum interval between progress log lines, in milliseconds.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    #[serde(default)]
    pub connector: ConnectorConfig,
}

fn default_progress_interval() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checksum_policy: ChecksumPolicy::default(),
            progress_interval_ms: default_progress_interval(),
            connector: ConnectorConfig::default(),
        }
    }
}

impl Config {
    /// Loads `explicit` if given (it must exist), otherwise the default
    /// location when present.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
            .join("artifact-connector")
            .join("cli.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("artifact-connector")
            .join("cli.toml")
    }
}
