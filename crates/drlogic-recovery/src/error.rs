//! Recovery error types

use drlogic_core_registry::{RegistryError, SiteId, TaskStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Site {site} is already recovering (task {task_id})")]
    AlreadyRecovering { site: SiteId, task_id: String },

    #[error("No recovery point available for site {site} (task {task_id})")]
    NoRecoveryPoint { site: SiteId, task_id: String },

    #[error("Unknown site: {0}")]
    UnknownSite(SiteId),

    #[error("Recovery task {0} not found")]
    TaskNotFound(String),

    #[error("Recovery task {task_id} is already {status}")]
    NotCancellable { task_id: String, status: TaskStatus },

    #[error("Invalid recovery policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
