//! Node configuration.
//!
//! Loads a `toml`-deserialized config if a path is given and exists,
//! otherwise falls back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dht_engine::EngineConfig;
use dht_store::TtlPolicy;

/// Complete node configuration for the DHT subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Bootstrap and transport-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Addresses of bootstrap peers, used when `nodes.txt` yields no peers
    /// on startup.
    #[serde(default)]
    pub bootstrap_addresses: Vec<String>,
    /// Capacity of the transport gateway's send/receive queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_addresses: Vec::new(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

/// Local Store settings: data directory and per-kind TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default under `$HOME/.duskpost`.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_index_ttl_days")]
    pub index_ttl_days: u64,
    #[serde(default = "default_email_ttl_days")]
    pub email_ttl_days: u64,
    #[serde(default = "default_contact_ttl_days")]
    pub contact_ttl_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            index_ttl_days: default_index_ttl_days(),
            email_ttl_days: default_email_ttl_days(),
            contact_ttl_days: default_contact_ttl_days(),
        }
    }
}

fn default_index_ttl_days() -> u64 {
    7
}

fn default_email_ttl_days() -> u64 {
    30
}

fn default_contact_ttl_days() -> u64 {
    30
}

/// Lookup/retry/maintenance timing constants, exposed as configuration
/// rather than hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_closest_lookup_timeout_secs")]
    pub closest_lookup_timeout_secs: u64,
    #[serde(default = "default_min_closest_nodes")]
    pub min_closest_nodes: usize,
    #[serde(default = "default_alpha")]
    pub alpha: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            closest_lookup_timeout_secs: default_closest_lookup_timeout_secs(),
            min_closest_nodes: default_min_closest_nodes(),
            alpha: default_alpha(),
            max_retries: default_max_retries(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_response_timeout_secs() -> u64 {
    5
}

fn default_closest_lookup_timeout_secs() -> u64 {
    20
}

fn default_min_closest_nodes() -> usize {
    5
}

fn default_alpha() -> usize {
    3
}

fn default_max_retries() -> u32 {
    5
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

impl NodeConfig {
    /// Load from `path` if it exists, else fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            index: Duration::from_secs(self.storage.index_ttl_days * 24 * 3600),
            email: Duration::from_secs(self.storage.email_ttl_days * 24 * 3600),
            contact: Duration::from_secs(self.storage.contact_ttl_days * 24 * 3600),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            response_timeout: Duration::from_secs(self.timing.response_timeout_secs),
            closest_lookup_timeout: Duration::from_secs(self.timing.closest_lookup_timeout_secs),
            min_closest_nodes: self.timing.min_closest_nodes,
            kademlia_k: dht_types::KADEMLIA_K,
            alpha: self.timing.alpha,
            max_retries: self.timing.max_retries,
            maintenance_interval: Duration::from_secs(self.timing.maintenance_interval_secs),
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DUSKPOST_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".duskpost"))
        .unwrap_or_else(|_| PathBuf::from("/tmp/duskpost"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_timing_values() {
        let config = NodeConfig::default();
        assert_eq!(config.timing.response_timeout_secs, 5);
        assert_eq!(config.timing.min_closest_nodes, 5);
        let engine = config.engine_config();
        assert_eq!(engine.kademlia_k, 20);
    }

    #[test]
    fn load_falls_back_to_defaults_when_missing() {
        let config = NodeConfig::load("/nonexistent/path/config.toml").expect("load");
        assert_eq!(config.storage.data_dir, "");
    }

    #[test]
    fn load_parses_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [network]
            bootstrap_addresses = ["peer.example:9111"]

            [storage]
            data_dir = "/var/lib/duskpost"
            "#,
        )
        .expect("write");
        let config = NodeConfig::load(&path).expect("load");
        assert_eq!(config.network.bootstrap_addresses, vec!["peer.example:9111"]);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/duskpost"));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = NodeConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let _parsed: NodeConfig = toml::from_str(&text).expect("parse");
    }
}
