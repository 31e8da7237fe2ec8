//! Node volume service for bare-metal drives.
//!
//! [`NodeVolumeService`] implements [`CsiNode`] and [`CsiHealth`] on top of
//! one owned [`VolumeManager`], a [`DevicePathResolver`] and the per-class
//! [`MountStrategies`].  It drives each volume through its node lifecycle:
//!
//! ```text
//! Creating -> Created -> Ready -> Published -> Ready -> ... -> Removed
//!                 \         \         \
//!                  +---------+---------+--> Failed (sticky)
//! ```
//!
//! Ephemeral volumes are created on their first publish and deleted on the
//! unpublish that releases their last owner; both round-trips go through the
//! [`VolumeOperations`] collaborator under a node-wide request lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::CsiError;
use crate::health::CsiHealth;
use crate::manager::VolumeManager;
use crate::mounter::{MountOptions, MountOrchestrator, MountStrategies};
use crate::node::CsiNode;
use crate::persistence::{CapacityReclaimer, VolumeOperations};
use crate::resolver::{DevicePathResolver, DriveQuery, GroupNameResolver};
use crate::types::*;
use crate::units::parse_bytes;

/// Volume-context key carrying the consuming pod's name.
pub const POD_NAME_KEY: &str = "csi.storage.k8s.io/pod.name";
/// Volume-context key set to a boolean string for inline (ephemeral) volumes.
pub const EPHEMERAL_KEY: &str = "csi.storage.k8s.io/ephemeral";
/// Volume-context key with the requested size of an ephemeral volume.
pub const SIZE_KEY: &str = "size";
/// Volume-context key with the requested storage type of an ephemeral volume.
pub const STORAGE_TYPE_KEY: &str = "storageType";

/// External collaborators the service is built from.
pub struct Collaborators {
    pub volume_ops: Arc<dyn VolumeOperations>,
    pub capacity: Arc<dyn CapacityReclaimer>,
    pub drive_query: Arc<dyn DriveQuery>,
    pub group_names: Arc<dyn GroupNameResolver>,
    pub mount_strategies: MountStrategies,
}

/// Node-side volume lifecycle handlers.
pub struct NodeVolumeService {
    config: NodeConfig,
    manager: VolumeManager,
    resolver: DevicePathResolver,
    mount_strategies: MountStrategies,
    volume_ops: Arc<dyn VolumeOperations>,
    capacity: Arc<dyn CapacityReclaimer>,
    /// Serializes every persistence call of the ephemeral create/delete path
    /// across all requests on this node.
    req_lock: tokio::sync::Mutex<()>,
}

/// Boolean strings accepted in the volume context.
fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn mount_flags(capability: Option<&VolumeCapability>) -> Vec<String> {
    capability.map(|c| c.mount_flags.clone()).unwrap_or_default()
}

fn require(value: &str, what: &str) -> Result<(), CsiError> {
    if value.is_empty() {
        return Err(CsiError::InvalidArgument(format!("{what} missing in request")));
    }
    Ok(())
}

impl NodeVolumeService {
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Self {
        let resolver = DevicePathResolver::new(
            collaborators.drive_query,
            collaborators.group_names,
            config.partition_sync,
        );
        Self {
            config,
            manager: VolumeManager::new(),
            resolver,
            mount_strategies: collaborators.mount_strategies,
            volume_ops: collaborators.volume_ops,
            capacity: collaborators.capacity,
            req_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The volume and drive caches. Populated by the inventory and record
    /// watchers, which live outside this crate.
    pub fn manager(&self) -> &VolumeManager {
        &self.manager
    }

    fn mounter(&self, class: StorageClass) -> MountOrchestrator {
        MountOrchestrator::new(self.mount_strategies.for_class(class))
    }

    fn set_status(&self, volume_id: &VolumeId, status: VolumeStatus) {
        if let Err(e) = self.manager.set_volume_status(volume_id, status) {
            warn!(%volume_id, %status, error = %e, "failed to update volume status");
        }
    }

    fn is_ephemeral_request(context: &HashMap<String, String>) -> bool {
        let Some(value) = context.get(EPHEMERAL_KEY) else {
            return false;
        };
        parse_flag(value).unwrap_or_else(|| {
            error!(%value, "failed to parse ephemeral flag, treating volume as persistent");
            false
        })
    }

    /// Create the backing record of an inline volume and cache it.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn create_inline_volume(&self, req: &NodePublishVolumeRequest) -> Result<Volume, CsiError> {
        let context = &req.volume_context;
        let size_str = context.get(SIZE_KEY).map(String::as_str).unwrap_or_default();
        let size = parse_bytes(size_str).map_err(|e| {
            error!(size = %size_str, error = %e, "failed to parse volume size");
            CsiError::Internal(format!("failed to parse size {size_str:?}: {e}"))
        })?;

        let (mode, fs_type) = match req.volume_capability.as_ref().map(|c| &c.access_type) {
            Some(AccessType::Mount { fs_type }) if fs_type.is_empty() => {
                info!(
                    default = %self.config.default_fs_type,
                    "fs type wasn't provided, using the default"
                );
                (VolumeMode::Fs, Some(self.config.default_fs_type.clone()))
            }
            Some(AccessType::Mount { fs_type }) => (VolumeMode::Fs, Some(fs_type.to_lowercase())),
            Some(AccessType::Block) | None => (VolumeMode::Raw, None),
        };

        let mut storage_class = StorageClass::from_label(
            context.get(STORAGE_TYPE_KEY).map(String::as_str).unwrap_or_default(),
        );
        if storage_class == StorageClass::Any {
            storage_class = self.config.ephemeral_fallback_class;
        }

        let request = Volume {
            id: req.volume_id.clone(),
            storage_class,
            location: String::new(),
            size,
            node_id: self.config.node_id.clone(),
            csi_status: VolumeStatus::Creating,
            mode,
            fs_type,
            ephemeral: true,
            owners: Vec::new(),
        };

        let mut volume = {
            let _guard = self.req_lock.lock().await;
            self.volume_ops.create_volume(request).await?
        };

        if volume.csi_status == VolumeStatus::Creating {
            volume.csi_status = self
                .volume_ops
                .wait_status(&volume.id, &[VolumeStatus::Failed, VolumeStatus::Created])
                .await?;
        }
        self.manager.insert_volume(volume.clone());

        if volume.csi_status == VolumeStatus::Failed {
            return Err(CsiError::Internal(format!(
                "volume {} reached failed status during creation",
                volume.id
            )));
        }

        if let Err(e) = self.capacity.delete_if_empty(&volume.location).await {
            error!(location = %volume.location, error = %e, "unable to check capacity by location");
        }

        info!(location = %volume.location, class = %volume.storage_class, "inline volume created");
        Ok(volume)
    }

    /// Delete the backing record of an inline volume and wait for it to go.
    #[instrument(skip(self))]
    async fn delete_inline_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let deleted = {
            let _guard = self.req_lock.lock().await;
            self.volume_ops.delete_volume(volume_id).await
        };
        match deleted {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!("volume doesn't exist");
                self.set_status(volume_id, VolumeStatus::Removed);
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "unable to delete volume");
                return Err(CsiError::Internal(format!("unable to delete volume: {e}")));
            }
        }

        let status = self
            .volume_ops
            .wait_status(volume_id, &[VolumeStatus::Failed, VolumeStatus::Removed])
            .await
            .map_err(|e| {
                error!(error = %e, "wait for volume removal failed");
                CsiError::Internal("unable to delete volume".into())
            })?;
        self.set_status(volume_id, status);
        if status == VolumeStatus::Failed {
            return Err(CsiError::Internal(format!(
                "volume {volume_id} reached failed status during deletion"
            )));
        }

        let _guard = self.req_lock.lock().await;
        self.volume_ops
            .update_after_deletion(volume_id)
            .await
            .map_err(|e| CsiError::Internal(format!("post-deletion cleanup failed: {e}")))?;
        info!("inline volume deleted");
        Ok(())
    }
}

#[async_trait]
impl CsiNode for NodeVolumeService {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        info!(staging_target_path = %req.staging_target_path, "processing stage request");

        if req.volume_capability.is_none() {
            return Err(CsiError::InvalidArgument(
                "Volume capability missing in request".into(),
            ));
        }
        require(req.volume_id.as_str(), "Volume ID")?;
        require(&req.staging_target_path, "Stage Path")?;

        let volume_id = &req.volume_id;
        let Some(volume) = self.manager.get_volume(volume_id) else {
            error!("no volume with this id found on node");
            return Err(CsiError::VolumeNotFound(volume_id.to_string()));
        };
        if volume.csi_status == VolumeStatus::Failed {
            return Err(CsiError::Internal(format!(
                "corresponding volume {volume_id} reached failed status"
            )));
        }

        let device = match self.resolver.resolve(&volume, self.manager.drives()).await {
            Ok(device) => device,
            Err(e) => {
                error!(error = %e, "failed to resolve device path");
                self.set_status(volume_id, VolumeStatus::Failed);
                return Err(CsiError::Internal("failed to stage volume".into()));
            }
        };

        let mounter = self.mounter(volume.storage_class);
        let target = Path::new(&req.staging_target_path);
        let opts = MountOptions {
            flags: mount_flags(req.volume_capability.as_ref()),
            ..MountOptions::device(&volume)
        };

        if let Err(e) = mounter.prepare_and_mount(&device, target, &opts).await {
            error!(device = %device.display(), error = %e, "failed to stage volume");
            self.set_status(volume_id, VolumeStatus::Failed);
            return Err(CsiError::Internal(format!(
                "failed to stage volume {volume_id}"
            )));
        }

        if volume.csi_status == VolumeStatus::Ready {
            debug!("volume already staged");
            return Ok(());
        }
        self.set_status(volume_id, VolumeStatus::Ready);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        info!("processing unstage request");

        require(volume_id.as_str(), "Volume ID")?;
        require(staging_target_path, "Stage Path")?;

        let Some(volume) = self.manager.get_volume(volume_id) else {
            return Err(CsiError::Internal("Unable to find volume".into()));
        };
        if volume.csi_status == VolumeStatus::Failed {
            return Err(CsiError::Internal(format!(
                "corresponding volume {volume_id} reached failed status"
            )));
        }

        // Unpublish carries no pod identity, so owners are reset here.
        if let Err(e) = self.manager.clear_volume_owners(volume_id) {
            error!(error = %e, "failed to clear owners");
        }

        if let Err(e) = self
            .mounter(volume.storage_class)
            .unmount(Path::new(staging_target_path))
            .await
        {
            self.set_status(volume_id, VolumeStatus::Failed);
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        info!(target_path = %req.target_path, "processing publish request");

        if req.volume_capability.is_none() {
            return Err(CsiError::InvalidArgument(
                "Volume capability missing in request".into(),
            ));
        }
        require(req.volume_id.as_str(), "Volume ID")?;
        require(&req.target_path, "Target Path")?;

        let volume_id = &req.volume_id;
        let inline = Self::is_ephemeral_request(&req.volume_context);

        let src = if inline {
            let created = self.create_inline_volume(&req).await.map_err(|e| {
                error!(error = %e, "failed to create inline volume");
                CsiError::Internal("failed to publish volume".into())
            })?;
            match self.resolver.resolve(&created, self.manager.drives()).await {
                Ok(device) => device,
                Err(e) => {
                    error!(error = %e, "failed to resolve device path");
                    self.set_status(volume_id, VolumeStatus::Failed);
                    return Err(CsiError::Internal("failed to publish volume".into()));
                }
            }
        } else {
            require(&req.staging_target_path, "Staging Path")?;
            PathBuf::from(&req.staging_target_path)
        };

        let Some(volume) = self.manager.get_volume(volume_id) else {
            return Err(CsiError::Internal("Unable to find volume".into()));
        };

        // Inline volumes mount the device directly; others bind the staging
        // path, which for raw-block volumes is itself a device file.
        let base = if inline {
            MountOptions::device(&volume)
        } else {
            MountOptions {
                block: volume.mode == VolumeMode::Raw,
                ..MountOptions::bind()
            }
        };
        let opts = MountOptions {
            read_only: req.read_only,
            flags: mount_flags(req.volume_capability.as_ref()),
            ..base
        };

        match req.volume_context.get(POD_NAME_KEY) {
            None => info!("pod info on mount is not provided"),
            Some(pod) => {
                if let Err(e) = self.manager.add_volume_owner(volume_id, pod) {
                    error!(owner = %pod, error = %e, "failed to set owner");
                }
            }
        }

        if volume.csi_status == VolumeStatus::Failed {
            return Err(CsiError::Internal(format!(
                "corresponding volume {volume_id} reached failed status"
            )));
        }

        if let Err(e) = self
            .mounter(volume.storage_class)
            .prepare_and_mount(&src, Path::new(&req.target_path), &opts)
            .await
        {
            error!(error = %e, "mount failed, marking volume failed");
            self.set_status(volume_id, VolumeStatus::Failed);
            return Err(CsiError::Internal("failed to publish volume".into()));
        }
        self.set_status(volume_id, VolumeStatus::Published);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        info!("processing unpublish request");

        require(volume_id.as_str(), "Volume ID")?;
        require(target_path, "Target Path")?;

        let Some(volume) = self.manager.get_volume(volume_id) else {
            return Err(CsiError::VolumeNotFound(volume_id.to_string()));
        };

        if let Err(e) = self
            .mounter(volume.storage_class)
            .unmount(Path::new(target_path))
            .await
        {
            self.set_status(volume_id, VolumeStatus::Failed);
            return Err(e);
        }

        let holders = self.manager.release_volume_owner(volume_id).unwrap_or_else(|e| {
            warn!(error = %e, "failed to release owner");
            0
        });
        if holders > 1 {
            debug!(remaining = holders - 1, "volume is still published to other owners");
            return Ok(());
        }
        self.set_status(volume_id, VolumeStatus::Ready);

        if volume.ephemeral {
            self.delete_inline_volume(volume_id).await?;
        }
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![NodeCapability::StageUnstageVolume])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        let topology = Topology {
            segments: HashMap::from([(
                self.config.topology_key(),
                self.config.node_id.clone(),
            )]),
        };
        debug!(?topology, "node topology");
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            accessible_topology: topology,
        })
    }
}

#[async_trait]
impl CsiHealth for NodeVolumeService {
    async fn check(&self) -> Result<HealthStatus, CsiError> {
        if !self.manager.is_initialized() {
            info!("node service is not ready yet");
            return Ok(HealthStatus::NotServing);
        }
        Ok(HealthStatus::Serving)
    }
}
