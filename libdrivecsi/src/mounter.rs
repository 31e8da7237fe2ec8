//! Mount orchestration.
//!
//! A [`MountStrategy`] issues the actual mount calls for one family of
//! storage classes.  [`MountOrchestrator`] wraps a strategy with the target
//! preparation and cleanup rules every stage and publish follows:
//!
//! 1. create the target path,
//! 2. skip the mount if the target already is a mount point,
//! 3. mount, removing the freshly created target again if anything fails.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::CsiError;
use crate::types::{StorageClass, Volume, VolumeMode};

/// Options of a single mount call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Bind-mount `src` instead of mounting a filesystem from it.
    pub bind: bool,
    /// `src` is a block device node; the target is a regular file.
    pub block: bool,
    /// Filesystem type for non-bind mounts. Required by `mount(2)` there.
    pub fs_type: Option<String>,
    pub read_only: bool,
    /// Caller mount flags such as `noatime`.
    pub flags: Vec<String>,
}

/// What a mount target has to be before mounting onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Directory,
    File,
}

impl MountOptions {
    pub fn bind() -> Self {
        Self {
            bind: true,
            ..Default::default()
        }
    }

    /// Options for mounting the device node of `volume`.
    ///
    /// Raw-block volumes, and volumes without a filesystem type, are
    /// bind-mounted as a device file.
    pub fn device(volume: &Volume) -> Self {
        match (volume.mode, &volume.fs_type) {
            (VolumeMode::Fs, Some(fs_type)) => Self {
                fs_type: Some(fs_type.clone()),
                ..Default::default()
            },
            _ => Self {
                bind: true,
                block: true,
                ..Default::default()
            },
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        if self.block {
            TargetKind::File
        } else {
            TargetKind::Directory
        }
    }
}

/// Per-storage-class mount implementation.
#[async_trait]
pub trait MountStrategy: Send + Sync {
    async fn mount(&self, src: &Path, dst: &Path, opts: &MountOptions) -> Result<(), CsiError>;

    async fn unmount(&self, path: &Path) -> Result<(), CsiError>;

    async fn create_target_path(&self, path: &Path, kind: TargetKind) -> Result<(), CsiError>;

    async fn delete_target_path(&self, path: &Path) -> Result<(), CsiError>;

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError>;
}

/// Mount strategies keyed by storage-class family.
#[derive(Clone)]
pub struct MountStrategies {
    rotational: Arc<dyn MountStrategy>,
    flash: Arc<dyn MountStrategy>,
}

impl MountStrategies {
    pub fn new(rotational: Arc<dyn MountStrategy>, flash: Arc<dyn MountStrategy>) -> Self {
        Self { rotational, flash }
    }

    /// One strategy for every class.
    pub fn uniform(strategy: Arc<dyn MountStrategy>) -> Self {
        Self {
            rotational: strategy.clone(),
            flash: strategy,
        }
    }

    pub fn for_class(&self, class: StorageClass) -> Arc<dyn MountStrategy> {
        if class.is_rotational() {
            self.rotational.clone()
        } else {
            self.flash.clone()
        }
    }
}

/// Target preparation and mount/unmount with cleanup on failure.
pub struct MountOrchestrator {
    strategy: Arc<dyn MountStrategy>,
}

impl MountOrchestrator {
    pub fn new(strategy: Arc<dyn MountStrategy>) -> Self {
        Self { strategy }
    }

    /// Prepare `target` and mount `src` onto it.
    ///
    /// An existing mount at `target` counts as success.
    #[instrument(skip(self, opts), fields(bind = opts.bind))]
    pub async fn prepare_and_mount(
        &self,
        src: &Path,
        target: &Path,
        opts: &MountOptions,
    ) -> Result<(), CsiError> {
        self.strategy
            .create_target_path(target, opts.target_kind())
            .await?;

        let mounted = match self.strategy.is_mount_point(target).await {
            Ok(mounted) => mounted,
            Err(e) => {
                warn!(error = %e, "mount point probe failed");
                self.cleanup(target).await;
                return Err(e);
            }
        };
        if mounted {
            info!("mount point already exists");
            return Ok(());
        }

        if let Err(e) = self.strategy.mount(src, target, opts).await {
            self.cleanup(target).await;
            return Err(e);
        }
        debug!("mounted");
        Ok(())
    }

    /// Unmount `target`. Every failure is reported as an unmount failure.
    #[instrument(skip(self))]
    pub async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        self.strategy
            .unmount(target)
            .await
            .map_err(|e| match e {
                e @ CsiError::UnmountFailed { .. } => e,
                other => CsiError::UnmountFailed {
                    path: target.display().to_string(),
                    reason: other.to_string(),
                },
            })?;
        info!("volume was successfully unmounted");
        Ok(())
    }

    async fn cleanup(&self, target: &Path) {
        if let Err(e) = self.strategy.delete_target_path(target).await {
            warn!(path = %target.display(), error = %e, "failed to remove target path");
        }
    }
}
