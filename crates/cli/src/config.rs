//! Daemon configuration via a TOML file, replacing a builder with "edit the
//! file and restart" — same model the teacher's `engine::database::config`
//! uses for `strata.toml`.

use serde::{Deserialize, Serialize};
use settlement_core::ShardRange;
use settlement_durability::DurabilityMode;
use std::path::Path;
use thiserror::Error;

/// Errors loading or interpreting a daemon config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not valid TOML for this shape.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// `durability` named a mode this config does not recognize.
    #[error("invalid durability mode '{0}', expected \"cache\", \"always\" or \"standard\"")]
    InvalidDurability(String),
    /// A sentinel key was not 32 bytes of hex.
    #[error("invalid sentinel key '{0}': expected 64 hex characters")]
    InvalidSentinelKey(String),
}

/// One shard's address and the UHS id range it owns, as named in
/// `shard_ranges`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardEndpoint {
    /// `host:port` the shard daemon listens on.
    pub addr: String,
    /// Lower bound (inclusive) of UHS ids this shard owns.
    pub range_low: u8,
    /// Upper bound (inclusive) of UHS ids this shard owns.
    pub range_high: u8,
}

impl ShardEndpoint {
    /// The range this endpoint owns, as the type the engine expects.
    pub fn range(&self) -> ShardRange {
        ShardRange {
            low: self.range_low,
            high: self.range_high,
        }
    }
}

fn default_durability() -> String {
    "standard".to_string()
}

fn default_batch_size() -> usize {
    256
}

fn default_window_size() -> usize {
    4096
}

fn default_attestation_threshold() -> usize {
    1
}

fn default_completed_txs_cache_size() -> usize {
    65_536
}

fn default_election_timeout_lower() -> u64 {
    150
}

fn default_election_timeout_upper() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    50
}

fn default_raft_max_batch() -> usize {
    100_000
}

fn default_stxo_cache_depth() -> usize {
    65_536
}

fn default_batch_workers() -> usize {
    4
}

/// Shared configuration loaded by every daemon binary. Fields unused by a
/// given binary (e.g. `shard_ranges` for `runtime-locking-shardd`) are
/// still parsed and validated so one file can describe a whole deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Durability mode: `"cache"`, `"standard"` or `"always"`.
    #[serde(default = "default_durability")]
    pub durability: String,
    /// Max CTXs per dtx before the coordinator cuts a batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Max admitted-but-unresolved CTXs before admission blocks.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Minimum valid sentinel attestations a CTX needs to be admitted.
    #[serde(default = "default_attestation_threshold")]
    pub attestation_threshold: usize,
    /// Admissible attestation public keys, as 64-character hex strings.
    #[serde(default)]
    pub sentinel_public_keys: Vec<String>,
    /// Every shard's address and owned UHS id range.
    #[serde(default)]
    pub shard_ranges: Vec<ShardEndpoint>,
    /// Capacity of each shard's completed-tx dedup cache.
    #[serde(default = "default_completed_txs_cache_size")]
    pub completed_txs_cache_size: usize,
    /// Lower bound, in milliseconds, of the external election timeout.
    #[serde(default = "default_election_timeout_lower")]
    pub election_timeout_lower: u64,
    /// Upper bound, in milliseconds, of the external election timeout.
    #[serde(default = "default_election_timeout_upper")]
    pub election_timeout_upper: u64,
    /// Heartbeat interval, in milliseconds, for the external election
    /// component.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Max commands a single replicated-log append batches into one fsync.
    #[serde(default = "default_raft_max_batch")]
    pub raft_max_batch: usize,
    /// Depth of the spent-output lookback cache an archiver or watchtower
    /// keeps; carried here only so one file configures the whole
    /// deployment, the core itself does not consume it.
    #[serde(default = "default_stxo_cache_depth")]
    pub stxo_cache_depth: usize,
    /// Batch-cycle / broker worker threads to run per daemon.
    #[serde(default = "default_batch_workers")]
    pub batch_workers: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            durability: default_durability(),
            batch_size: default_batch_size(),
            window_size: default_window_size(),
            attestation_threshold: default_attestation_threshold(),
            sentinel_public_keys: Vec::new(),
            shard_ranges: Vec::new(),
            completed_txs_cache_size: default_completed_txs_cache_size(),
            election_timeout_lower: default_election_timeout_lower(),
            election_timeout_upper: default_election_timeout_upper(),
            heartbeat_interval: default_heartbeat_interval(),
            raft_max_batch: default_raft_max_batch(),
            stxo_cache_depth: default_stxo_cache_depth(),
            batch_workers: default_batch_workers(),
        }
    }
}

impl DaemonConfig {
    /// Read and parse a config file, validating `durability` and every
    /// sentinel key eagerly so a bad file fails at startup, not mid-run.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: DaemonConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.durability_mode()?;
        config.sentinel_keys()?;
        Ok(config)
    }

    /// The durability mode named by `durability`.
    pub fn durability_mode(&self) -> Result<DurabilityMode, ConfigError> {
        match self.durability.as_str() {
            "cache" => Ok(DurabilityMode::Cache),
            "always" => Ok(DurabilityMode::Always),
            "standard" => Ok(DurabilityMode::Standard {
                interval_ms: 100,
                batch_size: self.raft_max_batch.min(1024),
            }),
            other => Err(ConfigError::InvalidDurability(other.to_string())),
        }
    }

    /// Parsed sentinel public keys, as fixed-size arrays.
    pub fn sentinel_keys(&self) -> Result<std::collections::HashSet<[u8; 32]>, ConfigError> {
        self.sentinel_public_keys
            .iter()
            .map(|hex_str| parse_hex_32(hex_str).ok_or_else(|| ConfigError::InvalidSentinelKey(hex_str.clone())))
            .collect()
    }
}

fn parse_hex_32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_parse_from_an_empty_file() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.batch_size, default_batch_size());
        assert_eq!(config.attestation_threshold, default_attestation_threshold());
        assert!(matches!(
            config.durability_mode().unwrap(),
            DurabilityMode::Standard { .. }
        ));
    }

    #[test]
    fn invalid_durability_is_rejected() {
        let config: DaemonConfig = toml::from_str("durability = \"turbo\"").unwrap();
        assert!(matches!(
            config.durability_mode(),
            Err(ConfigError::InvalidDurability(_))
        ));
    }

    #[test]
    fn sentinel_keys_parse_from_hex() {
        let key = "aa".repeat(32);
        let toml_str = format!("sentinel_public_keys = [\"{key}\"]");
        let config: DaemonConfig = toml::from_str(&toml_str).unwrap();
        let keys = config.sentinel_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&[0xaa; 32]));
    }

    #[test]
    fn malformed_sentinel_key_is_rejected() {
        let config: DaemonConfig = toml::from_str("sentinel_public_keys = [\"not-hex\"]").unwrap();
        assert!(matches!(
            config.sentinel_keys(),
            Err(ConfigError::InvalidSentinelKey(_))
        ));
    }

    #[test]
    fn shard_ranges_round_trip() {
        let toml_str = r#"
[[shard_ranges]]
addr = "127.0.0.1:9001"
range_low = 0
range_high = 127

[[shard_ranges]]
addr = "127.0.0.1:9002"
range_low = 128
range_high = 255
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shard_ranges.len(), 2);
        assert_eq!(config.shard_ranges[0].range().low, 0);
        assert_eq!(config.shard_ranges[1].range().high, 255);
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settlement.toml");
        std::fs::write(&path, "durability = \"always\"\nbatch_size = 32\n").unwrap();
        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.durability_mode().unwrap(), DurabilityMode::Always);
    }

    #[test]
    fn from_file_missing_path_errors() {
        let dir = tempdir().unwrap();
        let err = DaemonConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
