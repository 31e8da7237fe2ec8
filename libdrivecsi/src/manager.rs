//! Node-local volume and drive caches.
//!
//! [`VolumeManager`] is the single owner of the state the node handlers
//! share: the volume cache (mutated on every status transition and owner
//! change), the drive cache (replaced wholesale by the inventory refresh) and
//! the readiness gate.  The service holds one instance and passes it
//! explicitly; there is no process-wide cache.
//!
//! # Thread safety
//!
//! The volume cache is a [`DashMap`], so handlers working on different
//! volumes do not contend.  Owner updates are atomic per entry only; two
//! publishes for the same id are not serialized against each other.
//!
//! The drive cache sits behind a [`std::sync::Mutex`] that is never held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::error::CsiError;
use crate::types::{Drive, Volume, VolumeId, VolumeStatus};

/// Latest known drive inventory, keyed by drive uuid.
#[derive(Debug, Default)]
pub struct DriveCache {
    drives: Mutex<HashMap<String, Drive>>,
}

impl DriveCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Drive>> {
        // A panicking writer cannot leave the map half-updated: `replace`
        // swaps the whole map in one assignment.
        self.drives.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the drive at `location`.
    pub fn get(&self, location: &str) -> Option<Drive> {
        self.lock().get(location).cloned()
    }

    /// Replace the snapshot with `drives`.
    pub fn replace(&self, drives: impl IntoIterator<Item = Drive>) {
        let fresh: HashMap<String, Drive> =
            drives.into_iter().map(|d| (d.uuid.clone(), d)).collect();
        *self.lock() = fresh;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owner of the volume cache, the drive cache and the readiness gate.
#[derive(Debug, Default)]
pub struct VolumeManager {
    volumes: DashMap<VolumeId, Volume>,
    drives: DriveCache,
    initialized: AtomicBool,
}

impl VolumeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cached volume.
    pub fn get_volume(&self, volume_id: &VolumeId) -> Option<Volume> {
        self.volumes.get(volume_id).map(|v| v.clone())
    }

    /// Insert or refresh a volume record. Owners already recorded on the
    /// node survive a refresh; owners carried by `volume` are added to them.
    pub fn insert_volume(&self, mut volume: Volume) {
        debug!(volume_id = %volume.id, status = %volume.csi_status, "volume cached");
        match self.volumes.entry(volume.id.clone()) {
            Entry::Occupied(mut entry) => {
                let mut owners = std::mem::take(&mut entry.get_mut().owners);
                for owner in volume.owners.drain(..) {
                    if !owners.contains(&owner) {
                        owners.push(owner);
                    }
                }
                volume.owners = owners;
                entry.insert(volume);
            }
            Entry::Vacant(entry) => {
                entry.insert(volume);
            }
        }
    }

    pub fn set_volume_status(
        &self,
        volume_id: &VolumeId,
        status: VolumeStatus,
    ) -> Result<(), CsiError> {
        let mut entry = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| CsiError::VolumeNotFound(volume_id.to_string()))?;
        if entry.csi_status != status {
            info!(%volume_id, from = %entry.csi_status, to = %status, "volume status changed");
        }
        entry.csi_status = status;
        Ok(())
    }

    /// Record `owner` as a consumer of the volume. Recording the same owner
    /// twice is a no-op so orchestrator retries do not inflate the count.
    pub fn add_volume_owner(&self, volume_id: &VolumeId, owner: &str) -> Result<(), CsiError> {
        let mut entry = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| CsiError::VolumeNotFound(volume_id.to_string()))?;
        if !entry.owners.iter().any(|o| o == owner) {
            entry.owners.push(owner.to_owned());
        }
        Ok(())
    }

    /// Release one owner after an unpublish and return how many owners held
    /// the volume before the release.
    ///
    /// Unpublish requests do not say which workload is leaving, so the most
    /// recently recorded owner is dropped.
    pub fn release_volume_owner(&self, volume_id: &VolumeId) -> Result<usize, CsiError> {
        let mut entry = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| CsiError::VolumeNotFound(volume_id.to_string()))?;
        let before = entry.owners.len();
        entry.owners.pop();
        Ok(before)
    }

    pub fn clear_volume_owners(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let mut entry = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| CsiError::VolumeNotFound(volume_id.to_string()))?;
        entry.owners.clear();
        Ok(())
    }

    pub fn drives(&self) -> &DriveCache {
        &self.drives
    }

    /// Replace the drive snapshot. Called by the inventory refresh.
    pub fn update_drives(&self, drives: impl IntoIterator<Item = Drive>) {
        self.drives.replace(drives);
        debug!(count = self.drives.len(), "drive cache refreshed");
    }

    /// Open the readiness gate once the caches are warm.
    pub fn set_initialized(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("volume manager initialized");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}
