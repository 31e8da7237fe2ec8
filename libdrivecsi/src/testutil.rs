//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::mounter::{MountOptions, MountStrategy, TargetKind};
use crate::persistence::{CapacityReclaimer, VolumeOperations};
use crate::resolver::{DriveQuery, GroupNameResolver};
use crate::types::*;

pub const TEST_LOCATION: &str = "drive-uuid-1";

pub fn volume(id: &str, class: StorageClass, location: &str, status: VolumeStatus) -> Volume {
    Volume {
        id: id.into(),
        storage_class: class,
        location: location.to_owned(),
        size: 1 << 30,
        node_id: "node-1".into(),
        csi_status: status,
        mode: VolumeMode::Fs,
        fs_type: Some("xfs".into()),
        ephemeral: false,
        owners: Vec::new(),
    }
}

pub fn drive(uuid: &str, serial: &str) -> Drive {
    Drive {
        uuid: uuid.to_owned(),
        serial_number: serial.to_owned(),
        rotational: true,
        drive_type: "HDD".into(),
    }
}

// ---------------------------------------------------------------------------
// Drive query & group names
// ---------------------------------------------------------------------------

/// Block device of a drive is `/dev/sd<serial>`, its partitions are
/// `<device>-<uuid>`.
#[derive(Default)]
pub struct FakeDriveQuery {
    pub fail_block_device: bool,
    /// Partition lookups that fail before one succeeds.
    pub partition_misses: AtomicUsize,
    pub lookups: AtomicUsize,
    pub reads: AtomicUsize,
}

impl FakeDriveQuery {
    pub fn partition_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn uuid_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriveQuery for FakeDriveQuery {
    async fn find_block_device(&self, drive: &Drive) -> Result<PathBuf, CsiError> {
        if self.fail_block_device {
            return Err(CsiError::backend("lsblk failed"));
        }
        Ok(PathBuf::from(format!("/dev/sd{}", drive.serial_number)))
    }

    async fn read_partition_uuid(&self, _device: &Path) -> Result<String, CsiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok("readback".into())
    }

    async fn find_partition_by_uuid(
        &self,
        device: &Path,
        uuid: &str,
    ) -> Result<PathBuf, CsiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let missed = self
            .partition_misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Err(CsiError::backend("partition not found"));
        }
        Ok(PathBuf::from(format!("{}-{uuid}", device.display())))
    }
}

/// Real group name of record `r` is `vg-r`.
#[derive(Default)]
pub struct FakeGroupNames {
    pub calls: AtomicUsize,
}

impl FakeGroupNames {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupNameResolver for FakeGroupNames {
    async fn real_group_name(&self, record_name: &str) -> Result<String, CsiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("vg-{record_name}"))
    }
}

// ---------------------------------------------------------------------------
// Mounter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MountTable {
    created: HashSet<String>,
    files: HashSet<String>,
    mounted: HashSet<String>,
    deleted: Vec<String>,
    mounts: Vec<(String, String, MountOptions)>,
    unmounts: Vec<String>,
}

#[derive(Default)]
pub struct FakeMounter {
    pub fail_probe: bool,
    pub fail_mount: bool,
    pub fail_unmount: bool,
    pub table: Mutex<MountTable>,
}

fn key(path: &Path) -> String {
    path.display().to_string()
}

impl FakeMounter {
    fn table(&self) -> std::sync::MutexGuard<'_, MountTable> {
        self.table.lock().unwrap()
    }

    pub fn add_mount(&self, path: &str) {
        self.table().mounted.insert(path.to_owned());
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        self.table().mounted.contains(path)
    }

    pub fn created(&self, path: &str) -> bool {
        self.table().created.contains(path)
    }

    pub fn created_file(&self, path: &str) -> bool {
        self.table().files.contains(path)
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.table().deleted.clone()
    }

    /// `(src, dst, bind)` of every mount call.
    pub fn mount_calls(&self) -> Vec<(String, String, bool)> {
        self.table()
            .mounts
            .iter()
            .map(|(src, dst, opts)| (src.clone(), dst.clone(), opts.bind))
            .collect()
    }

    /// Options of every mount call.
    pub fn mount_options(&self) -> Vec<MountOptions> {
        self.table().mounts.iter().map(|(_, _, opts)| opts.clone()).collect()
    }

    pub fn unmount_calls(&self) -> Vec<String> {
        self.table().unmounts.clone()
    }
}

#[async_trait]
impl MountStrategy for FakeMounter {
    async fn mount(&self, src: &Path, dst: &Path, opts: &MountOptions) -> Result<(), CsiError> {
        if self.fail_mount {
            return Err(CsiError::MountFailed {
                path: key(dst),
                reason: "wrong fs type".into(),
            });
        }
        let mut table = self.table();
        table.mounts.push((key(src), key(dst), opts.clone()));
        table.mounted.insert(key(dst));
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<(), CsiError> {
        let mut table = self.table();
        table.unmounts.push(key(path));
        if self.fail_unmount {
            return Err(CsiError::internal("target is busy"));
        }
        table.mounted.remove(&key(path));
        Ok(())
    }

    async fn create_target_path(&self, path: &Path, kind: TargetKind) -> Result<(), CsiError> {
        let mut table = self.table();
        table.created.insert(key(path));
        if kind == TargetKind::File {
            table.files.insert(key(path));
        }
        Ok(())
    }

    async fn delete_target_path(&self, path: &Path) -> Result<(), CsiError> {
        let mut table = self.table();
        table.created.remove(&key(path));
        table.files.remove(&key(path));
        table.deleted.push(key(path));
        Ok(())
    }

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError> {
        if self.fail_probe {
            return Err(CsiError::internal("stat failed"));
        }
        Ok(self.table().mounted.contains(&key(path)))
    }
}

// ---------------------------------------------------------------------------
// Persistence & capacity
// ---------------------------------------------------------------------------

pub struct FakeVolumeOps {
    /// Status of the record returned by `create_volume`.
    pub create_status: VolumeStatus,
    /// Outcome of waiting for `Created | Failed`.
    pub created_outcome: VolumeStatus,
    /// Outcome of waiting for `Removed | Failed`.
    pub removal_outcome: VolumeStatus,
    pub delete_not_found: bool,
    pub fail_delete: bool,
    pub calls: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for FakeVolumeOps {
    fn default() -> Self {
        Self {
            create_status: VolumeStatus::Creating,
            created_outcome: VolumeStatus::Created,
            removal_outcome: VolumeStatus::Removed,
            delete_not_found: false,
            fail_delete: false,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeVolumeOps {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(call)).count()
    }

    /// Highest number of mutating calls observed running at once.
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn mutation(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VolumeOperations for FakeVolumeOps {
    async fn create_volume(&self, mut volume: Volume) -> Result<Volume, CsiError> {
        self.record(format!("create:{}", volume.id));
        self.mutation().await;
        volume.location = TEST_LOCATION.to_owned();
        volume.csi_status = self.create_status;
        Ok(volume)
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        self.record(format!("delete:{volume_id}"));
        self.mutation().await;
        if self.delete_not_found {
            return Err(CsiError::VolumeNotFound(volume_id.to_string()));
        }
        if self.fail_delete {
            return Err(CsiError::backend("api server unavailable"));
        }
        Ok(())
    }

    async fn wait_status(
        &self,
        volume_id: &VolumeId,
        statuses: &[VolumeStatus],
    ) -> Result<VolumeStatus, CsiError> {
        self.record(format!("wait:{volume_id}"));
        if statuses.contains(&VolumeStatus::Created) {
            Ok(self.created_outcome)
        } else {
            Ok(self.removal_outcome)
        }
    }

    async fn update_after_deletion(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        self.record(format!("cleanup:{volume_id}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCapacity {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCapacity {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapacityReclaimer for FakeCapacity {
    async fn delete_if_empty(&self, location: &str) -> Result<(), CsiError> {
        self.calls.lock().unwrap().push(location.to_owned());
        if self.fail {
            return Err(CsiError::backend("capacity record locked"));
        }
        Ok(())
    }
}
