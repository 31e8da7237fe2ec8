//! Core data model: volumes, drives, capabilities, requests, and topology.
//!
//! These types are shared by the node service, the volume manager and the
//! collaborator traits.  They are all [`Serialize`]/[`Deserialize`] so an
//! embedding transport can move them around as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Storage classes & lifecycle
// ---------------------------------------------------------------------------

/// Storage class of a volume.
///
/// Plain-drive classes place a volume on a partition of a whole drive;
/// group-backed classes place it as a logical volume inside a volume group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageClass {
    Any,
    Hdd,
    Ssd,
    Nvme,
    #[serde(rename = "HDDLVG")]
    HddLvg,
    #[serde(rename = "SSDLVG")]
    SsdLvg,
}

impl StorageClass {
    /// Convert a user-facing storage-type label. Unknown labels mean `Any`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "HDD" => Self::Hdd,
            "SSD" => Self::Ssd,
            "NVME" => Self::Nvme,
            "HDDLVG" => Self::HddLvg,
            "SSDLVG" => Self::SsdLvg,
            _ => Self::Any,
        }
    }

    /// Volumes of this class live inside a volume group.
    pub fn is_group_backed(self) -> bool {
        matches!(self, Self::HddLvg | Self::SsdLvg)
    }

    /// The volume's location names a group record whose real volume-group
    /// name has to be looked up first.
    pub fn needs_group_name_lookup(self) -> bool {
        matches!(self, Self::SsdLvg)
    }

    /// Backed by rotational media.
    pub fn is_rotational(self) -> bool {
        matches!(self, Self::Any | Self::Hdd | Self::HddLvg)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Any => "ANY",
            Self::Hdd => "HDD",
            Self::Ssd => "SSD",
            Self::Nvme => "NVME",
            Self::HddLvg => "HDDLVG",
            Self::SsdLvg => "SSDLVG",
        };
        f.write_str(s)
    }
}

/// Node-observed lifecycle state of a volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeStatus {
    /// The backing record is being provisioned.
    Creating,
    /// Provisioned, not yet mounted on the node.
    Created,
    /// Mounted at the staging path.
    Ready,
    /// Mounted into one or more workloads.
    Published,
    /// Sticky failure; needs out-of-band remediation.
    Failed,
    /// Backing record deleted. Terminal.
    Removed,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the workload consumes the volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VolumeMode {
    /// Mounted filesystem.
    #[default]
    Fs,
    /// Raw block device.
    Raw,
}

// ---------------------------------------------------------------------------
// Volume & drive records
// ---------------------------------------------------------------------------

/// Node-side view of a volume record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub storage_class: StorageClass,
    /// Drive uuid for plain-drive classes, volume-group (record) name for
    /// group-backed classes.
    pub location: String,
    /// Requested capacity in bytes.
    pub size: u64,
    pub node_id: String,
    pub csi_status: VolumeStatus,
    #[serde(default)]
    pub mode: VolumeMode,
    /// Filesystem type, `None` for raw block volumes.
    #[serde(default)]
    pub fs_type: Option<String>,
    #[serde(default)]
    pub ephemeral: bool,
    /// Workloads currently holding a published mount of this volume.
    #[serde(default)]
    pub owners: Vec<String>,
}

/// Snapshot of a physical drive as reported by the drive inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Drive {
    pub uuid: String,
    pub serial_number: String,
    pub rotational: bool,
    /// Drive type as reported by the inventory, e.g. `HDD` or `NVME`.
    pub drive_type: String,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Access type requested for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Mounted filesystem. An empty `fs_type` means "use the default".
    Mount { fs_type: String },
    /// Raw block access.
    Block,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

impl VolumeCapability {
    pub fn mount(fs_type: impl Into<String>) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: fs_type.into(),
            },
            mount_flags: Vec::new(),
        }
    }

    pub fn block() -> Self {
        Self {
            access_type: AccessType::Block,
            mount_flags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage (first-mount) a volume on the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
    /// Missing capability is rejected as an invalid argument.
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to publish a volume into a workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: VolumeId,
    /// Source of the bind mount; unused for ephemeral volumes.
    #[serde(default)]
    pub staging_target_path: String,
    pub target_path: String,
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    #[serde(default)]
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Node info & health
// ---------------------------------------------------------------------------

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Information about the node on which the service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub accessible_topology: Topology,
}

/// Node service capabilities advertised to the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
}

/// Binary serving status reported by the health check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Serving,
    NotServing,
}
