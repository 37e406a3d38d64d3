/*!
 * DR-Logic - disaster-recovery control plane
 *
 * Protects VMs and volumes by replicating them to a backup site on a
 * schedule chosen by a pluggable policy engine, shares each site's
 * replication bandwidth among concurrent flows, and recreates a failed
 * site's resources at its backup site in dependency order.
 *
 * The building blocks live in the workspace crates:
 * - `drlogic-core-registry`: protected entities and recovery task records
 * - `drlogic-core-driver`: the replication engine interface
 * - `drlogic-core-policy`: urgency, due decisions, bandwidth allocation
 * - `drlogic-sentinel`: the control loop and the cleanup loop
 * - `drlogic-recovery`: the recovery orchestrator
 *
 * This crate wires them into a service with configuration, logging and an
 * HTTP control API.
 */

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;

pub use config::{ConfigError, DrConfig};
pub use error::{DrError, ErrorCategory, Result};
pub use service::{DrService, ProtectRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
