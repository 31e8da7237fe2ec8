//! Node agent configuration.
//!
//! Environment variables read by [`NodeConfig::from_env`]:
//! - `BMCSI_NODE_ID`: identity of this node. Required.
//! - `BMCSI_DRIVER_NAMESPACE`: prefix of the topology key. Defaults to `baremetal-csi`.
//! - `BMCSI_DEFAULT_FS_TYPE`: filesystem used when a request names none. Defaults to `xfs`.
//! - `BMCSI_PART_SYNC_ATTEMPTS`: partition lookups tried after an ephemeral
//!   partition is created. Defaults to `5`.
//! - `BMCSI_PART_SYNC_DELAY_MS`: delay before the first lookup, doubled on
//!   every retry. Defaults to `200`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::StorageClass;

pub const DEFAULT_DRIVER_NAMESPACE: &str = "baremetal-csi";
pub const DEFAULT_FS_TYPE: &str = "xfs";

/// Bounded backoff used while waiting for a new partition to show up in the
/// kernel partition table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionSync {
    pub attempts: u32,
    pub initial_delay_ms: u64,
}

impl PartitionSync {
    /// Delay before lookup number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }
}

impl Default for PartitionSync {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_ms: 200,
        }
    }
}

/// Configuration of one node agent instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: String,
    #[serde(default = "default_driver_namespace")]
    pub driver_namespace: String,
    #[serde(default = "default_fs_type")]
    pub default_fs_type: String,
    /// Class used for ephemeral volumes that ask for `ANY`.
    #[serde(default = "default_ephemeral_class")]
    pub ephemeral_fallback_class: StorageClass,
    #[serde(default)]
    pub partition_sync: PartitionSync,
}

fn default_driver_namespace() -> String {
    DEFAULT_DRIVER_NAMESPACE.to_owned()
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_owned()
}

fn default_ephemeral_class() -> StorageClass {
    StorageClass::Hdd
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            driver_namespace: default_driver_namespace(),
            default_fs_type: default_fs_type(),
            ephemeral_fallback_class: default_ephemeral_class(),
            partition_sync: PartitionSync::default(),
        }
    }

    /// Build the configuration from `BMCSI_*` environment variables.
    pub fn from_env() -> Result<Self, CsiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, CsiError> {
        let node_id = get("BMCSI_NODE_ID")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsiError::InvalidArgument("BMCSI_NODE_ID is not set".into()))?;
        let mut cfg = Self::new(node_id);

        if let Some(ns) = get("BMCSI_DRIVER_NAMESPACE").filter(|v| !v.is_empty()) {
            cfg.driver_namespace = ns;
        }
        if let Some(fs) = get("BMCSI_DEFAULT_FS_TYPE").filter(|v| !v.is_empty()) {
            cfg.default_fs_type = fs.to_lowercase();
        }
        if let Some(v) = get("BMCSI_PART_SYNC_ATTEMPTS") {
            cfg.partition_sync.attempts = v.parse().map_err(|e| {
                CsiError::InvalidArgument(format!("BMCSI_PART_SYNC_ATTEMPTS={v}: {e}"))
            })?;
        }
        if let Some(v) = get("BMCSI_PART_SYNC_DELAY_MS") {
            cfg.partition_sync.initial_delay_ms = v.parse().map_err(|e| {
                CsiError::InvalidArgument(format!("BMCSI_PART_SYNC_DELAY_MS={v}: {e}"))
            })?;
        }
        Ok(cfg)
    }

    /// Topology key advertised by `get_info`.
    pub fn topology_key(&self) -> String {
        format!("{}/nodeid", self.driver_namespace)
    }
}
