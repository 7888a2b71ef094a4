//! Process-wide configuration knobs. Every knob has a specified default and
//! is process-wide, read once at startup.
//!
//! Follows the general approach of a small typed config object read once at
//! daemon start, the way `pbs-config`'s section-config files work, trimmed
//! here to plain TOML since none of this config needs PBS's user/ACL section
//! format. Each daemon gets its own config struct rather than one shared
//! god-object, one file per concern.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

/// Storage node knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageNodeConfig {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// `S_max`: superblock rotation size.
    pub max_superblock_size: u64,
    /// Payload ceiling before the header margin.
    pub max_payload_size: u32,
    /// Extra margin added on top of `max_payload_size` for framing.
    pub header_margin: u32,
    /// `WARN` disk-usage threshold.
    pub warn_threshold: f64,
    /// `CRIT` disk-usage threshold, fixed here (see DESIGN.md) at 0.95,
    /// above `warn_threshold`.
    pub crit_threshold: f64,
}

impl Default for StorageNodeConfig {
    fn default() -> Self {
        StorageNodeConfig {
            node_id: "node-0".to_string(),
            data_dir: PathBuf::from("./cds-storage-data"),
            bind_addr: "0.0.0.0:8420".parse().unwrap(),
            max_superblock_size: 1 << 30, // 1 GiB
            max_payload_size: 2 * 1024 * 1024, // 2 MiB
            header_margin: 4096,
            warn_threshold: 0.85,
            crit_threshold: 0.95,
        }
    }
}

impl StorageNodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = load_toml_or_default::<Self>(path)?;
        if let Ok(id) = std::env::var("CDS_NODE_ID") {
            config.node_id = id;
        }
        if let Ok(dir) = std::env::var("CDS_STORAGE_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("CDS_STORAGE_BIND") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid CDS_STORAGE_BIND '{addr}'"))?;
        }
        Ok(config)
    }
}

/// Coordinator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// `T_timeout`: heartbeat age beyond which a node is no longer `healthy`.
    pub heartbeat_timeout_secs: f64,
    /// `T_probe`: deadline for a prepare head-request.
    pub prepare_probe_timeout_secs: f64,
    /// `P_hot`: popularity threshold separating replicated from erasure.
    pub popularity_threshold: u64,
    /// `R`: replication factor for the `replicated` mode.
    pub replication_factor: u32,
    /// `K`: erasure data shards.
    pub erasure_k: u8,
    /// `M`: erasure parity shards.
    pub erasure_m: u8,
    /// `WARN` disk-usage threshold used in node-state derivation, same
    /// default as the storage node's own threshold.
    pub warn_threshold: f64,
    /// `CRIT` disk-usage threshold used in node-state derivation.
    pub crit_threshold: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            database_path: PathBuf::from("./cds-coordinator.sqlite"),
            bind_addr: "0.0.0.0:8421".parse().unwrap(),
            heartbeat_timeout_secs: 30.0,
            prepare_probe_timeout_secs: 3.0,
            popularity_threshold: 1000,
            replication_factor: 3,
            erasure_k: 3,
            erasure_m: 2,
            warn_threshold: 0.85,
            crit_threshold: 0.95,
        }
    }
}

impl CoordinatorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = load_toml_or_default::<Self>(path)?;
        if let Ok(dir) = std::env::var("CDS_COORDINATOR_DB") {
            config.database_path = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("CDS_COORDINATOR_BIND") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid CDS_COORDINATOR_BIND '{addr}'"))?;
        }
        Ok(config)
    }

    /// N = K + M, the total number of erasure fragments per chunk.
    pub fn erasure_n(&self) -> u8 {
        self.erasure_k + self.erasure_m
    }

    /// Quorum size for a candidate set of `n` nodes: `floor(n/2) + 1`.
    pub fn quorum_size(n: usize) -> usize {
        n / 2 + 1
    }
}

/// Adaptive reader knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// `T_probe`: interval between latency/bandwidth probes.
    pub probe_interval_secs: f64,
    /// `T_probe_deadline`: per-probe cancellation deadline, `<= T_probe`.
    pub probe_deadline_secs: f64,
    /// `T_download_deadline`: per-chunk-download cancellation deadline.
    pub download_deadline_secs: f64,
    /// `C_max`: maximum concurrent chunk downloads.
    pub concurrency: usize,
    pub start_playback_sec: f64,
    pub low_water_sec: f64,
    pub target_sec: f64,
    pub latency_window: usize,
    pub reliability_window: usize,
    pub bandwidth_window: usize,
    pub bandwidth_seed_mbps: f64,
    /// `T_failover`: testable upper bound on time-to-next-chunk after a
    /// mid-session node failure.
    pub failover_bound_secs: f64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            probe_interval_secs: 3.0,
            probe_deadline_secs: 3.0,
            download_deadline_secs: 30.0,
            concurrency: 4,
            start_playback_sec: 10.0,
            low_water_sec: 15.0,
            target_sec: 30.0,
            latency_window: 10,
            reliability_window: 20,
            bandwidth_window: 10,
            bandwidth_seed_mbps: 50.0,
            failover_bound_secs: 5.0,
        }
    }
}

impl ReaderConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        load_toml_or_default::<Self>(path)
    }
}

fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T, Error>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match path {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read config file {path:?}"))?;
            toml::from_str(&text).with_context(|| format!("invalid config file {path:?}"))
        }
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_values() {
        let storage = StorageNodeConfig::default();
        assert_eq!(storage.max_superblock_size, 1 << 30);
        assert_eq!(storage.max_payload_size, 2 * 1024 * 1024);

        let coordinator = CoordinatorConfig::default();
        assert_eq!(coordinator.erasure_n(), 5);
        assert_eq!(CoordinatorConfig::quorum_size(3), 2);
        assert_eq!(CoordinatorConfig::quorum_size(4), 3);

        let reader = ReaderConfig::default();
        assert_eq!(reader.concurrency, 4);
        assert_eq!(reader.start_playback_sec, 10.0);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = StorageNodeConfig::load(Some(Path::new("/nonexistent/cds.toml"))).unwrap();
        assert_eq!(config.node_id, "node-0");
    }
}
