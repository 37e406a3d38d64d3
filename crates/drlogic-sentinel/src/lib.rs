//! DR-Logic Sentinel: the periodic loops of the control plane
//!
//! Two independent background loops keep protected entities replicated and
//! their artifacts tidy. Each runs on its own period and stops when its
//! [`CancellationToken`](tokio_util::sync::CancellationToken) fires.
//!
//! # Control loop
//!
//! ```text
//! ┌─────────────┐
//! │  Observe    │──> Snapshot the entity registry
//! └──────┬──────┘
//!        v
//! ┌─────────────┐
//! │  Decide     │──> Policy engine: urgency, due, bandwidth
//! └──────┬──────┘
//!        v
//! ┌─────────────┐
//! │  Act        │──> Claim flows, replicate concurrently, record outcomes
//! └──────┬──────┘
//!        └────> Loop
//! ```
//!
//! # Cleanup loop
//!
//! Expires artifacts past the retention window (never the newest one),
//! reconciles each entity's recovery point with the driver, and flags
//! entities that breached the staleness SLA.
//!
//! # Example
//!
//! ```no_run
//! use drlogic_core_driver::MockDriver;
//! use drlogic_core_policy::{PolicyEngine, SiteBudget};
//! use drlogic_core_registry::{Bandwidth, EntityRegistry};
//! use drlogic_sentinel::{ControlLoop, LoopPolicy};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), drlogic_sentinel::SentinelError> {
//! let registry = Arc::new(EntityRegistry::in_memory());
//! let budgets = vec![SiteBudget::new("site-a", Bandwidth(1000), 0.6, 0.3)];
//! let control = ControlLoop::new(
//!     registry,
//!     Arc::new(MockDriver::new()),
//!     PolicyEngine::Fairness,
//!     budgets,
//!     LoopPolicy::default(),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! let handle = tokio::spawn({
//!     let cancel = cancel.clone();
//!     async move { control.run(cancel).await }
//! });
//!
//! cancel.cancel();
//! handle.await.ok();
//! # Ok(())
//! # }
//! ```

use drlogic_core_registry::RegistryError;
use thiserror::Error;

pub mod daemon;
pub mod janitor;
pub mod metrics;
pub mod policy;

pub use daemon::ControlLoop;
pub use janitor::CleanupLoop;
pub use metrics::{CleanupStats, CycleStats, CycleStatsBuilder};
pub use policy::LoopPolicy;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Invalid loop policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
