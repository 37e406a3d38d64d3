/*!
 * Error types for the DR-Logic service
 */

use crate::config::ConfigError;
use drlogic_core_driver::DriverError;
use drlogic_core_registry::RegistryError;
use drlogic_recovery::RecoveryError;
use drlogic_sentinel::SentinelError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DrError>;

#[derive(Error, Debug)]
pub enum DrError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Entity {0} is not registered")]
    EntityNotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Sentinel(#[from] SentinelError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl DrError {
    /// Get error category for logging and API responses
    pub fn category(&self) -> ErrorCategory {
        match self {
            DrError::Validation(_) => ErrorCategory::Validation,
            DrError::EntityNotFound(_) => ErrorCategory::NotFound,
            DrError::Registry(e) => registry_category(e),
            DrError::Recovery(e) => match e {
                RecoveryError::AlreadyRecovering { .. } | RecoveryError::NotCancellable { .. } => {
                    ErrorCategory::Conflict
                }
                RecoveryError::NoRecoveryPoint { .. } => ErrorCategory::Consistency,
                RecoveryError::UnknownSite(_) | RecoveryError::TaskNotFound(_) => {
                    ErrorCategory::NotFound
                }
                RecoveryError::InvalidPolicy(_) => ErrorCategory::Configuration,
                RecoveryError::Registry(e) => registry_category(e),
            },
            DrError::Sentinel(e) => match e {
                SentinelError::InvalidPolicy(_) => ErrorCategory::Configuration,
                SentinelError::Registry(e) => registry_category(e),
            },
            DrError::Driver(e) if e.is_transient() => ErrorCategory::DriverTransient,
            DrError::Driver(_) => ErrorCategory::DriverPermanent,
            DrError::Config(_) => ErrorCategory::Configuration,
            DrError::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Errors caused by the caller's request rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation
                | ErrorCategory::NotFound
                | ErrorCategory::Conflict
                | ErrorCategory::Consistency
        )
    }
}

fn registry_category(error: &RegistryError) -> ErrorCategory {
    match error {
        RegistryError::AlreadyProtected(_) | RegistryError::FlowInProgress(_) => {
            ErrorCategory::Conflict
        }
        RegistryError::NotFound(_) => ErrorCategory::NotFound,
        RegistryError::Invalid(_) => ErrorCategory::Validation,
        RegistryError::InvariantViolation { .. } => ErrorCategory::InvariantViolation,
        RegistryError::Backend(_) => ErrorCategory::Storage,
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or rejected request
    Validation,
    /// Unknown entity, site or task
    NotFound,
    /// Duplicate protect, recovery already running
    Conflict,
    /// Timeout or network failure talking to the replication engine
    DriverTransient,
    /// The replication engine refused the operation
    DriverPermanent,
    /// Missing recovery point or unrecoverable dependency
    Consistency,
    /// Two flows in flight for one entity
    InvariantViolation,
    Configuration,
    Storage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::DriverTransient => write!(f, "driver_transient"),
            ErrorCategory::DriverPermanent => write!(f, "driver_permanent"),
            ErrorCategory::Consistency => write!(f, "consistency"),
            ErrorCategory::InvariantViolation => write!(f, "invariant_violation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Storage => write!(f, "storage"),
        }
    }
}
