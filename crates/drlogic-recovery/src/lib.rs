//! DR-Logic Recovery: recreate a failed site's protected entities
//!
//! # State machine
//!
//! ```text
//!            ┌──────────────── task ────────────────┐
//! trigger ──>│ Running                              │──> Completed
//!            │   step: Pending ─> InProgress ─┬─> Completed
//!            │                                ├─> Failed      │──> PartiallyCompleted
//!            │                                └─> Cancelled   │──> Failed | Cancelled
//!            └──────────────────────────────────────┘
//! ```
//!
//! Volumes are recreated and confirmed before the instances attached to
//! them; independent steps run concurrently. One recovery per site runs at
//! a time.
//!
//! # Example
//!
//! ```no_run
//! use drlogic_core_driver::MockDriver;
//! use drlogic_core_registry::EntityRegistry;
//! use drlogic_recovery::{RecoveryOrchestrator, RecoveryPolicy};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> drlogic_recovery::Result<()> {
//! let orchestrator = RecoveryOrchestrator::new(
//!     Arc::new(EntityRegistry::in_memory()),
//!     Arc::new(MockDriver::new()),
//!     RecoveryPolicy::default(),
//!     HashMap::from([("site-a".to_string(), "site-b".to_string())]),
//! )?;
//!
//! let task_id = orchestrator.trigger("site-a").await?;
//! let task = orchestrator.wait(&task_id).await?;
//! println!("{}", task.summary());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod policy;

pub use error::{RecoveryError, Result};
pub use orchestrator::RecoveryOrchestrator;
pub use policy::RecoveryPolicy;
