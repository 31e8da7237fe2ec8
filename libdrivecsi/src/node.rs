//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local mount
//! operations that make a volume available to workloads:
//!
//! 1. **Stage**: mount the volume's device at the staging path.
//! 2. **Publish**: bind-mount the staging path into the workload (or, for
//!    ephemeral volumes, create the volume and mount its device directly).
//! 3. **Unpublish**: remove the workload's mount.
//! 4. **Unstage**: unmount the staging path.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the staging path.
    ///
    /// Staging an already `Ready` volume again succeeds without changing
    /// its state.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume: unmount it from the staging path.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume into a workload.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from a workload's target path.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Volume statistics. Not collected; always an empty success.
    async fn get_volume_stats(
        &self,
        _volume_id: &VolumeId,
        _volume_path: &str,
    ) -> Result<(), CsiError> {
        Ok(())
    }

    /// Online expansion. Not supported; always an empty success.
    async fn expand_volume(
        &self,
        _volume_id: &VolumeId,
        _volume_path: &str,
    ) -> Result<(), CsiError> {
        Ok(())
    }

    /// Capabilities of this node service.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
