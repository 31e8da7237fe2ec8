//! Device-path resolution.
//!
//! [`DevicePathResolver`] turns a cached [`Volume`] into the host path that
//! gets mounted: a partition of a physical drive for plain-drive classes, or
//! a logical volume `/dev/<group>/<volume-id>` for group-backed classes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::config::PartitionSync;
use crate::error::CsiError;
use crate::manager::DriveCache;
use crate::types::{Drive, Volume};

const VOLUME_ID_PREFIX: &str = "pvc-";

/// Low-level block device queries.
#[async_trait]
pub trait DriveQuery: Send + Sync {
    /// Kernel block device of `drive`, e.g. `/dev/sdb`.
    async fn find_block_device(&self, drive: &Drive) -> Result<PathBuf, CsiError>;

    /// Partition uuid of the partition created on `device`.
    async fn read_partition_uuid(&self, device: &Path) -> Result<String, CsiError>;

    /// Device path of the partition of `device` whose uuid is `uuid`.
    async fn find_partition_by_uuid(&self, device: &Path, uuid: &str)
    -> Result<PathBuf, CsiError>;
}

/// Translation of volume-group record names into real volume-group names.
#[async_trait]
pub trait GroupNameResolver: Send + Sync {
    async fn real_group_name(&self, record_name: &str) -> Result<String, CsiError>;
}

/// Partition uuid a non-ephemeral volume was created with.
pub fn volume_uuid(volume_id: &str) -> &str {
    volume_id
        .strip_prefix(VOLUME_ID_PREFIX)
        .unwrap_or(volume_id)
}

pub struct DevicePathResolver {
    drive_query: Arc<dyn DriveQuery>,
    group_names: Arc<dyn GroupNameResolver>,
    partition_sync: PartitionSync,
}

impl DevicePathResolver {
    pub fn new(
        drive_query: Arc<dyn DriveQuery>,
        group_names: Arc<dyn GroupNameResolver>,
        partition_sync: PartitionSync,
    ) -> Self {
        Self {
            drive_query,
            group_names,
            partition_sync,
        }
    }

    /// Resolve the device or mount-source path of `volume`.
    #[instrument(skip_all, fields(volume_id = %volume.id, class = %volume.storage_class))]
    pub async fn resolve(&self, volume: &Volume, drives: &DriveCache) -> Result<PathBuf, CsiError> {
        if volume.storage_class.is_group_backed() {
            return self.logical_volume_path(volume).await;
        }
        self.partition_path(volume, drives).await
    }

    async fn logical_volume_path(&self, volume: &Volume) -> Result<PathBuf, CsiError> {
        let group = if volume.storage_class.needs_group_name_lookup() {
            self.group_names
                .real_group_name(&volume.location)
                .await
                .map_err(|e| {
                    CsiError::Internal(format!(
                        "unable to read volume group name for {}: {e}",
                        volume.location
                    ))
                })?
        } else {
            volume.location.clone()
        };
        Ok(Path::new("/dev").join(group).join(volume.id.as_str()))
    }

    async fn partition_path(&self, volume: &Volume, drives: &DriveCache) -> Result<PathBuf, CsiError> {
        let drive = drives
            .get(&volume.location)
            .ok_or_else(|| CsiError::DriveNotFound(volume.location.clone()))?;

        let device = self
            .drive_query
            .find_block_device(&drive)
            .await
            .map_err(|e| {
                CsiError::Internal(format!(
                    "unable to find device for drive with S/N {}: {e}",
                    drive.serial_number
                ))
            })?;

        if !volume.ephemeral {
            let uuid = volume_uuid(volume.id.as_str());
            return self
                .drive_query
                .find_partition_by_uuid(&device, uuid)
                .await;
        }

        // Ephemeral ids are not partition uuids; read back the one the
        // partition was created with.
        let uuid = self
            .drive_query
            .read_partition_uuid(&device)
            .await
            .map_err(|e| {
                CsiError::Internal(format!(
                    "unable to find partition by device {}: {e}",
                    device.display()
                ))
            })?;
        self.wait_for_partition(&device, &uuid).await
    }

    /// The kernel may not have re-read the partition table yet, so the lookup
    /// is retried with a doubling delay.  The attempt budget bounds the wait;
    /// it does not guarantee the table has synced.
    async fn wait_for_partition(&self, device: &Path, uuid: &str) -> Result<PathBuf, CsiError> {
        let attempts = self.partition_sync.attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            tokio::time::sleep(self.partition_sync.delay(attempt)).await;
            match self.drive_query.find_partition_by_uuid(device, uuid).await {
                Ok(path) => {
                    debug!(attempt, path = %path.display(), "partition visible");
                    return Ok(path);
                }
                Err(e) => {
                    warn!(attempt, device = %device.display(), %uuid, error = %e, "partition not visible yet");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CsiError::Internal(format!("partition {uuid} not found on {}", device.display()))
        }))
    }
}
