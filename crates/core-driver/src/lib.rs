//! DR-Logic Core Driver: Replication Engine Abstraction
//!
//! This crate defines the [`ReplicationDriver`] trait, the only way the
//! control plane talks to the external replication engine. The engine owns
//! the data transfer (image copy, volume backup, block-level sync); the
//! control plane only decides *when* and *with how much bandwidth*.
//!
//! # Implementations
//!
//! - [`MockDriver`]: in-memory fake with scripted failures and delays
//! - [`TimedDriver`]: decorator turning slow calls into [`DriverError::Timeout`]
//! - [`HttpDriver`]: JSON-over-HTTP client for a remote engine
//!
//! # Example
//!
//! ```rust,no_run
//! use drlogic_core_driver::{DriverError, ReplicationDriver, ReplicationRequest};
//! use drlogic_core_registry::{Bandwidth, EntityKind};
//!
//! async fn protect_once<D: ReplicationDriver>(driver: &D) -> Result<(), DriverError> {
//!     let request = ReplicationRequest {
//!         entity_id: "vm-1".into(),
//!         kind: EntityKind::Instance,
//!         site_id: "site-a".into(),
//!         action: "image_copy".into(),
//!         bandwidth: Bandwidth(40),
//!     };
//!     let artifact = driver.replicate(&request).await?;
//!     println!("recovery point {} at {}", artifact.id, artifact.created_at);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use drlogic_core_registry::{ArtifactRef, Bandwidth, EntityId, EntityKind, SiteId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod http;
pub mod mock;
pub mod timeout;

pub use http::HttpDriver;
pub use mock::{DriverEvent, MockDriver};
pub use timeout::TimedDriver;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Network failure, engine overloaded, ... worth retrying
    #[error("Transient driver error: {0}")]
    Transient(String),

    /// The engine reports the resource as unrecoverable
    #[error("Permanent driver error: {0}")]
    Permanent(String),

    #[error("Driver call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl DriverError {
    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_) | DriverError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// One replication action to issue for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub site_id: SiteId,
    /// Replication action type (`image_copy`, `volume_backup`, ...)
    pub action: String,
    /// Bandwidth allocated to this flow for the current period
    pub bandwidth: Bandwidth,
}

/// Recreation of an entity from a recovery point at the backup site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecreateRequest {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub artifact: ArtifactRef,
    pub target_site: SiteId,
    /// Resource ids of already-recreated volumes to attach (instances only)
    pub attachments: Vec<String>,
}

/// The interface to the external replication engine
///
/// Implementations must be `Send + Sync + 'static` to be shared between the
/// control loop, the cleanup loop and recovery executions.
#[async_trait]
pub trait ReplicationDriver: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &str {
        "driver"
    }

    /// Copy the entity's current state to the backup site
    ///
    /// Returns the artifact produced by the completed action.
    async fn replicate(&self, request: &ReplicationRequest) -> Result<ArtifactRef>;

    /// Artifacts held for an entity, oldest first
    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRef>>;

    /// Delete one artifact
    ///
    /// Deleting an artifact that no longer exists must succeed.
    async fn delete_artifact(&self, artifact: &ArtifactRef) -> Result<()>;

    /// Recreate an entity from an artifact, returning the new resource id
    async fn recreate(&self, request: &RecreateRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DriverError::Transient("reset".into()).is_transient());
        assert!(DriverError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!DriverError::Permanent("gone".into()).is_transient());
        assert!(!DriverError::NotFound("a-1".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Driver call timed out after 30s");
    }
}
