//! Connector configuration.

use std::sync::Arc;

use artifact_transfer::checksum::{self, ChecksumAlgorithm};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Tunables for a [`RepositoryConnector`](crate::RepositoryConnector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Requests of one batch in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    /// Upload pull size for the buffered body strategy.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Force buffered uploads even over plain HTTP.
    #[serde(default)]
    pub disable_zero_copy: bool,

    /// Sibling checksum extensions, strongest first.
    #[serde(default = "default_checksum_algorithms")]
    pub checksum_algorithms: Vec<String>,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds (0 = none).
    #[serde(default)]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_chunk_size() -> usize {
    artifact_transfer::DEFAULT_CHUNK_SIZE
}

fn default_checksum_algorithms() -> Vec<String> {
    vec!["sha1".into(), "md5".into()]
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("artifact-connector/", env!("CARGO_PKG_VERSION")).into()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            chunk_size: default_chunk_size(),
            disable_zero_copy: false,
            checksum_algorithms: default_checksum_algorithms(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl ConnectorConfig {
    /// Resolves [`checksum_algorithms`](Self::checksum_algorithms) in order.
    pub fn resolve_algorithms(&self) -> Result<Vec<Arc<dyn ChecksumAlgorithm>>, ConnectorError> {
        self.checksum_algorithms
            .iter()
            .map(|name| {
                checksum::algorithm_by_name(name)
                    .ok_or_else(|| ConnectorError::UnknownAlgorithm(name.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.max_concurrent_transfers, 8);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert!(!config.disable_zero_copy);
        assert_eq!(config.checksum_algorithms, vec!["sha1", "md5"]);
        assert_eq!(config.request_timeout_secs, 0);
        assert!(config.user_agent.starts_with("artifact-connector/"));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"disable_zero_copy": true, "chunk_size": 1024}"#).unwrap();
        assert!(config.disable_zero_copy);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_concurrent_transfers, 8);
        assert_eq!(config.checksum_algorithms, vec!["sha1", "md5"]);
    }

    #[test]
    fn resolves_algorithms_in_order() {
        let config = ConnectorConfig {
            checksum_algorithms: vec!["sha256".into(), "SHA1".into()],
            ..ConnectorConfig::default()
        };
        let exts: Vec<String> = config
            .resolve_algorithms()
            .unwrap()
            .iter()
            .map(|a| a.extension().to_string())
            .collect();
        assert_eq!(exts, vec!["sha256", "sha1"]);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let config = ConnectorConfig {
            checksum_algorithms: vec!["crc32".into()],
            ..ConnectorConfig::default()
        };
        assert!(matches!(
            config.resolve_algorithms(),
            Err(ConnectorError::UnknownAlgorithm(name)) if name == "crc32"
        ));
    }
}
