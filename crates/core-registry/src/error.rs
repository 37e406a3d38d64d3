//! Registry error types

use crate::types::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Entity {0} is already protected")]
    AlreadyProtected(EntityId),

    #[error("Entity {0} is not registered")]
    NotFound(EntityId),

    #[error("Entity {0} already has a replication in flight")]
    FlowInProgress(EntityId),

    #[error("Invariant violated for entity {entity}: {detail}")]
    InvariantViolation { entity: EntityId, detail: String },

    #[error("Invalid entity: {0}")]
    Invalid(String),

    #[error("Registry backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl RegistryError {
    /// Errors that reject a caller's request (no retry makes sense)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::AlreadyProtected(_) | RegistryError::Invalid(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
