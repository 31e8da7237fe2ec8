//! Volume persistence and capacity collaborators.
//!
//! Durable volume records live outside the node agent.  The node only needs
//! them for ephemeral volumes, whose whole life is driven by publish and
//! unpublish: the node creates the record, waits for it to settle, and
//! deletes it again once the last workload lets go.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{Volume, VolumeId, VolumeStatus};

/// Operations over externally stored volume records.
#[async_trait]
pub trait VolumeOperations: Send + Sync {
    /// Create the record for `volume` and return it as stored.
    ///
    /// The returned record may still be [`VolumeStatus::Creating`].
    async fn create_volume(&self, volume: Volume) -> Result<Volume, CsiError>;

    /// Request deletion of a record.
    ///
    /// A record that is already gone is reported as
    /// [`CsiError::VolumeNotFound`].
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Block until the record reaches one of `statuses` and return the one
    /// it reached.  Timeouts are the implementation's responsibility.
    async fn wait_status(
        &self,
        volume_id: &VolumeId,
        statuses: &[VolumeStatus],
    ) -> Result<VolumeStatus, CsiError>;

    /// Release whatever the deleted volume still held (capacity records and
    /// the like).
    async fn update_after_deletion(&self, volume_id: &VolumeId) -> Result<(), CsiError>;
}

/// Allocation-capacity bookkeeping.
#[async_trait]
pub trait CapacityReclaimer: Send + Sync {
    /// Drop the capacity record for `location` if nothing is left in it.
    async fn delete_if_empty(&self, location: &str) -> Result<(), CsiError>;
}
