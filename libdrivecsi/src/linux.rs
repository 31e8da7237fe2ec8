//! Linux implementations of the mount and drive-query collaborators.
//!
//! [`LinuxMountStrategy`] issues mount syscalls through `nix` and detects
//! mount points from `/proc/self/mounts`.  [`LsblkDriveQuery`] finds drives
//! and partitions from `lsblk --json` output.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::mount::MsFlags;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::CsiError;
use crate::mounter::{MountOptions, MountStrategy, TargetKind};
use crate::resolver::DriveQuery;
use crate::types::Drive;

const PROC_MOUNTS: &str = "/proc/self/mounts";

// ---------------------------------------------------------------------------
// Mount strategy
// ---------------------------------------------------------------------------

/// Decode the octal escapes (`\040` for a space) the kernel writes into
/// mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Return `true` if `path` is listed as a mount point in `mounts`
/// (`/proc/self/mounts` format).
fn listed_as_mount_point(mounts: &str, path: &Path) -> bool {
    mounts.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(unescape_mount_field)
            .is_some_and(|target| Path::new(&target) == path)
    })
}

/// Split caller mount flags into `mount(2)` flags and the filesystem
/// specific data string.
fn split_mount_flags(flags: &[String]) -> (MsFlags, Option<String>) {
    let mut ms = MsFlags::empty();
    let mut data = Vec::new();
    for flag in flags.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        match flag {
            "defaults" => {}
            "ro" => ms |= MsFlags::MS_RDONLY,
            "rw" => ms.remove(MsFlags::MS_RDONLY),
            "noatime" => ms |= MsFlags::MS_NOATIME,
            "nodiratime" => ms |= MsFlags::MS_NODIRATIME,
            "relatime" => ms |= MsFlags::MS_RELATIME,
            "strictatime" => ms |= MsFlags::MS_STRICTATIME,
            "nosuid" => ms |= MsFlags::MS_NOSUID,
            "nodev" => ms |= MsFlags::MS_NODEV,
            "noexec" => ms |= MsFlags::MS_NOEXEC,
            "sync" => ms |= MsFlags::MS_SYNCHRONOUS,
            "dirsync" => ms |= MsFlags::MS_DIRSYNC,
            other => data.push(other),
        }
    }
    let data = (!data.is_empty()).then(|| data.join(","));
    (ms, data)
}

/// Mounts with `mount(2)` / `umount(2)` on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct LinuxMountStrategy {
    mounts_table: PathBuf,
}

impl Default for LinuxMountStrategy {
    fn default() -> Self {
        Self {
            mounts_table: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl LinuxMountStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read mount points from `table` instead of `/proc/self/mounts`.
    pub fn with_mounts_table(table: impl Into<PathBuf>) -> Self {
        Self {
            mounts_table: table.into(),
        }
    }
}

fn mount_error(path: &Path, reason: impl std::fmt::Display) -> CsiError {
    CsiError::MountFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn mount_blocking(src: &Path, dst: &Path, opts: &MountOptions) -> Result<(), CsiError> {
    let (mut flags, data) = split_mount_flags(&opts.flags);
    if opts.read_only {
        flags |= MsFlags::MS_RDONLY;
    }

    if !opts.bind {
        let fs_type = opts
            .fs_type
            .as_deref()
            .ok_or_else(|| mount_error(dst, "filesystem type is required for a device mount"))?;
        return nix::mount::mount(Some(src), dst, Some(fs_type), flags, data.as_deref())
            .map_err(|e| mount_error(dst, e));
    }

    nix::mount::mount(Some(src), dst, None::<&str>, MsFlags::MS_BIND, None::<&str>)
        .map_err(|e| mount_error(dst, e))?;
    if let Some(data) = data {
        warn!(%data, dst = %dst.display(), "filesystem options are ignored on bind mounts");
    }
    // Per-mount flags are ignored on the initial bind; a remount applies them.
    if !flags.is_empty() {
        nix::mount::mount(
            None::<&str>,
            dst,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | flags,
            None::<&str>,
        )
        .map_err(|e| mount_error(dst, format!("remount with {flags:?}: {e}")))?;
    }
    Ok(())
}

#[async_trait]
impl MountStrategy for LinuxMountStrategy {
    async fn mount(&self, src: &Path, dst: &Path, opts: &MountOptions) -> Result<(), CsiError> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        let opts = opts.clone();

        // The syscall runs to completion even if the request is dropped.
        tokio::task::spawn_blocking(move || {
            mount_blocking(&src, &dst, &opts)?;
            info!(
                src = %src.display(),
                dst = %dst.display(),
                bind = opts.bind,
                block = opts.block,
                "mounted"
            );
            Ok(())
        })
        .await
        .map_err(CsiError::internal)?
    }

    async fn unmount(&self, path: &Path) -> Result<(), CsiError> {
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            nix::mount::umount(&target).map_err(|e| CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            })
        })
        .await
        .map_err(CsiError::internal)?
    }

    async fn create_target_path(&self, path: &Path, kind: TargetKind) -> Result<(), CsiError> {
        let create_err = |e: std::io::Error| mount_error(path, format!("create target path: {e}"));
        match kind {
            TargetKind::Directory => tokio::fs::create_dir_all(path).await.map_err(create_err),
            TargetKind::File => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(create_err)?;
                }
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(path)
                    .await
                    .map(drop)
                    .map_err(create_err)
            }
        }
    }

    async fn delete_target_path(&self, path: &Path) -> Result<(), CsiError> {
        let removed = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CsiError::Internal(format!(
                "remove target path {}: {e}",
                path.display()
            ))),
        }
    }

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError> {
        let contents = tokio::fs::read_to_string(&self.mounts_table)
            .await
            .map_err(|e| {
                CsiError::Internal(format!("read {}: {e}", self.mounts_table.display()))
            })?;
        Ok(listed_as_mount_point(&contents, path))
    }
}

// ---------------------------------------------------------------------------
// Drive query
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct BlockDevice {
    name: String,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    partuuid: Option<String>,
    #[serde(default)]
    children: Vec<BlockDevice>,
}

fn parse_lsblk(output: &str) -> Result<Vec<BlockDevice>, CsiError> {
    let parsed: LsblkOutput = serde_json::from_str(output)
        .map_err(|e| CsiError::BackendError(format!("failed to parse lsblk output: {e}")))?;
    Ok(parsed.blockdevices)
}

fn device_by_serial<'a>(devices: &'a [BlockDevice], serial: &str) -> Option<&'a BlockDevice> {
    devices
        .iter()
        .find(|d| d.serial.as_deref().map(str::trim) == Some(serial))
}

fn first_partuuid(devices: &[BlockDevice]) -> Option<String> {
    devices
        .iter()
        .flat_map(|d| d.children.iter())
        .find_map(|c| c.partuuid.clone())
}

fn partition_by_uuid(devices: &[BlockDevice], uuid: &str) -> Option<PathBuf> {
    devices
        .iter()
        .flat_map(|d| d.children.iter())
        .find(|c| {
            c.partuuid
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(uuid))
        })
        .map(|c| PathBuf::from(&c.name))
}

/// Drive and partition lookups backed by `lsblk`.
#[derive(Debug, Clone)]
pub struct LsblkDriveQuery {
    program: String,
}

impl Default for LsblkDriveQuery {
    fn default() -> Self {
        Self {
            program: "lsblk".to_owned(),
        }
    }
}

impl LsblkDriveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, device: Option<&Path>) -> Result<Vec<BlockDevice>, CsiError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--json", "--paths", "--output", "NAME,SERIAL,PARTUUID"]);
        if let Some(device) = device {
            cmd.arg(device);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| CsiError::BackendError(format!("failed to execute lsblk: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(code = ?output.status.code(), %stderr, "lsblk failed");
            return Err(CsiError::BackendError(format!("lsblk failed: {}", stderr.trim())));
        }
        parse_lsblk(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl DriveQuery for LsblkDriveQuery {
    async fn find_block_device(&self, drive: &Drive) -> Result<PathBuf, CsiError> {
        let devices = self.run(None).await?;
        let device = device_by_serial(&devices, &drive.serial_number).ok_or_else(|| {
            CsiError::BackendError(format!(
                "no block device with serial number {}",
                drive.serial_number
            ))
        })?;
        debug!(serial = %drive.serial_number, device = %device.name, "block device found");
        Ok(PathBuf::from(&device.name))
    }

    async fn read_partition_uuid(&self, device: &Path) -> Result<String, CsiError> {
        let devices = self.run(Some(device)).await?;
        first_partuuid(&devices).ok_or_else(|| {
            CsiError::BackendError(format!("no partition found on {}", device.display()))
        })
    }

    async fn find_partition_by_uuid(
        &self,
        device: &Path,
        uuid: &str,
    ) -> Result<PathBuf, CsiError> {
        let devices = self.run(Some(device)).await?;
        partition_by_uuid(&devices, uuid).ok_or_else(|| {
            CsiError::BackendError(format!(
                "partition {uuid} not found on {}",
                device.display()
            ))
        })
    }
}
