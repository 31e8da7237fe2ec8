//! # libdrivecsi: CSI node agent for bare-metal drives
//!
//! `libdrivecsi` is the node-local half of a [Container Storage
//! Interface][csi] driver that hands out whole-drive partitions and
//! LVM logical volumes to workloads.  It translates a volume id into a host
//! device path, mounts it, and advances the volume's lifecycle state while
//! many requests run concurrently.  It follows the RK8s conventions (Tokio
//! async runtime, `tracing` for observability, `thiserror` for structured
//! errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `Drive`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its status [`Code`]. |
//! | [`config`] | [`NodeConfig`], read from `BMCSI_*` variables. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`health`] | [`CsiHealth`] trait: readiness check. |
//! | [`service`] | [`NodeVolumeService`], the lifecycle state machine. |
//! | [`manager`] | [`VolumeManager`]: volume and drive caches. |
//! | [`resolver`] | [`DevicePathResolver`]: volume → device path. |
//! | [`mounter`] | [`MountOrchestrator`] and the [`MountStrategy`] trait. |
//! | [`persistence`] | Volume record and capacity collaborators. |
//! | [`linux`] | `nix`/`lsblk` implementations of the OS collaborators. |
//! | [`units`] | Byte-size parsing. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod config;
pub mod error;
pub mod health;
pub mod linux;
pub mod manager;
pub mod mounter;
pub mod node;
pub mod persistence;
pub mod resolver;
pub mod service;
pub mod types;
pub mod units;

#[cfg(test)]
mod testutil;

// Re-export the most commonly used items at crate root for convenience.
pub use config::NodeConfig;
pub use error::{Code, CsiError};
pub use health::CsiHealth;
pub use manager::VolumeManager;
pub use mounter::{MountOptions, MountOrchestrator, MountStrategies, MountStrategy, TargetKind};
pub use node::CsiNode;
pub use resolver::DevicePathResolver;
pub use service::{Collaborators, NodeVolumeService};
pub use types::*;
