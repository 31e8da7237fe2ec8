//! Health service trait.
//!
//! Readiness is a single gate: the node reports [`HealthStatus::NotServing`]
//! until its caches have been warmed and [`HealthStatus::Serving`] after.
//! Streaming health updates are not provided.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::HealthStatus;

#[async_trait]
pub trait CsiHealth: Send + Sync {
    /// Current serving status.
    async fn check(&self) -> Result<HealthStatus, CsiError>;

    /// Stream of status changes. Not implemented.
    async fn watch(&self) -> Result<HealthStatus, CsiError> {
        Err(CsiError::Unimplemented("method Watch not implemented".into()))
    }
}
