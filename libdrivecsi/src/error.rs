//! CSI error types.
//!
//! All errors in the `libdrivecsi` crate are represented by the [`CsiError`]
//! enum, which derives [`thiserror::Error`] and [`Serialize`]/[`Deserialize`]
//! so an embedding transport can forward them unchanged.  [`CsiError::code`]
//! folds the variants into the four status classes the orchestrator
//! understands.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status class reported back to the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Code {
    /// Malformed or missing request fields; nothing was mutated.
    InvalidArgument,
    /// Volume unknown to the node cache, or drive unknown to the drive cache.
    NotFound,
    /// Resolution, mount, unmount or collaborator failure.
    Internal,
    /// The operation is not provided by this service.
    Unimplemented,
}

/// Unified error type for node operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The drive backing a volume is not present in the drive cache.
    #[error("drive with uuid {0} wasn't found")]
    DriveNotFound(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A collaborator (persistence, drive query, ...) returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// The operation is intentionally not implemented.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Status class of this error.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::VolumeNotFound(_) | Self::DriveNotFound(_) => Code::NotFound,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => Code::Internal,
        }
    }

    /// `true` when the error means "the thing is not there".
    pub fn is_not_found(&self) -> bool {
        self.code() == Code::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CsiError::VolumeNotFound("vol-123".into());
        assert_eq!(err.to_string(), "volume vol-123 not found");

        let err = CsiError::DriveNotFound("drive-1".into());
        assert_eq!(err.to_string(), "drive with uuid drive-1 wasn't found");
    }

    #[test]
    fn mount_errors_are_internal() {
        let err = CsiError::UnmountFailed {
            path: "/mnt/test".into(),
            reason: "device busy".into(),
        };
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(CsiError::backend("boom").code(), Code::Internal);
    }

    #[test]
    fn not_found_class() {
        assert!(CsiError::DriveNotFound("d".into()).is_not_found());
        assert!(CsiError::VolumeNotFound("v".into()).is_not_found());
        assert!(!CsiError::internal("x").is_not_found());
        assert_eq!(
            CsiError::Unimplemented("watch".into()).code(),
            Code::Unimplemented
        );
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = CsiError::MountFailed {
            path: "/mnt/test".into(),
            reason: "permission denied".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CsiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }
}
