//! Node configuration: defaults, TOML file, and flag overlay.

use dft_core::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Unique server ID.
    #[serde(default = "default_id")]
    pub id: String,
    /// Client RPC listen address.
    #[serde(default = "default_client_addr")]
    pub client_addr: String,
    /// Consensus RPC listen address.
    #[serde(default = "default_raft_addr")]
    pub raft_addr: String,
    /// Address peers use to reach this node; defaults to `raft_addr`.
    #[serde(default)]
    pub raft_advertise: Option<String>,
    /// Metrics exporter address; disabled when empty.
    #[serde(default)]
    pub metrics_addr: Option<String>,
    /// Root for the log, stable, and snapshot stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root of the per-path blob cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Initial peer raft addresses, used only when bootstrapping.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Seed the initial configuration from self + peers.
    #[serde(default)]
    pub bootstrap: bool,
    /// Consistency checker interval in seconds; 0 disables the checker.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Election timeout lower bound in milliseconds.
    #[serde(default = "default_election_timeout")]
    pub election_timeout_ms: u64,
    /// Log length that triggers a snapshot.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,
}

fn default_id() -> String {
    "node1".to_string()
}

fn default_client_addr() -> String {
    "127.0.0.1:13000".to_string()
}

fn default_raft_addr() -> String {
    "127.0.0.1:12000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_check_interval() -> u64 {
    30
}

fn default_election_timeout() -> u64 {
    250
}

fn default_snapshot_threshold() -> u64 {
    8192
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: default_id(),
            client_addr: default_client_addr(),
            raft_addr: default_raft_addr(),
            raft_advertise: None,
            metrics_addr: None,
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            peers: Vec::new(),
            bootstrap: false,
            check_interval_secs: default_check_interval(),
            election_timeout_ms: default_election_timeout(),
            snapshot_threshold: default_snapshot_threshold(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| DriftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_default(path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(&Config::default())
            .map_err(|e| DriftError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DriftError::Config("id must not be empty".into()));
        }
        if self.client_addr == self.raft_addr {
            return Err(DriftError::Config(
                "client_addr and raft_addr must differ".into(),
            ));
        }
        if self.election_timeout_ms < 50 {
            return Err(DriftError::Config(
                "election_timeout_ms must be at least 50".into(),
            ));
        }
        if self.snapshot_threshold < 16 {
            return Err(DriftError::Config(
                "snapshot_threshold must be at least 16".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    /// Heartbeats run at a small fraction of the election timeout.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.election_timeout_ms / 10).max(10))
    }

    #[must_use]
    pub fn check_interval(&self) -> Option<Duration> {
        if self.check_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.check_interval_secs))
        }
    }
}
