//! DR-Logic Core Registry: durable protection state
//!
//! # Overview
//!
//! The registry tracks every VM and volume enrolled for disaster-recovery
//! replication, together with the state of its replication flow, and keeps
//! the records of recovery executions.
//!
//! # Features
//!
//! - **Per-entity linearizability**: [`EntityRegistry::update`] is an atomic
//!   read-modify-write under a per-entity lock; no global lock
//! - **At most one flow in flight**: the flow is embedded in its entity, so
//!   claiming it is part of the same atomic update
//! - **Multiple Backends**: in-memory and redb (pure Rust, survives restarts)
//!
//! # Example
//!
//! ```no_run
//! use drlogic_core_registry::{EntityFilter, EntityKind, EntityRegistry, ProtectedEntity};
//! use chrono::Utc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = drlogic_core_registry::open(Some("registry.redb".as_ref()))?;
//! let registry = EntityRegistry::new(store);
//!
//! let now = Utc::now();
//! let volume = ProtectedEntity::new("vol-1", EntityKind::Volume, "site-a", "volume_backup", now);
//! registry.register(volume).await?;
//!
//! for entity in registry.list(&EntityFilter::site("site-a")).await? {
//!     println!("{} next due at {}", entity.id, entity.next_due_at);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub mod backends;
pub mod entity;
pub mod error;
pub mod registry;
pub mod task;
pub mod types;

pub use backends::memory::MemoryStore;
pub use backends::redb::RedbStore;
pub use entity::{
    Criticality, EntityFilter, EntityKind, EntityState, FlowStatus, ProtectedEntity,
    ReplicationFlow,
};
pub use error::{RegistryError, Result};
pub use registry::{EntityRegistry, Unregistered};
pub use task::{RecoveryStep, RecoveryTask, StepCounts, StepStatus, TaskStatus};
pub use types::{ArtifactRef, Bandwidth, EntityId, SiteId};

/// Core trait for registry storage backends
///
/// Backends only need single-record atomicity; per-entity serialization of
/// read-modify-write cycles is provided by [`EntityRegistry`].
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert an entity unless its id is taken. Returns `false` if it was.
    async fn insert_entity(&self, entity: &ProtectedEntity) -> anyhow::Result<bool>;

    /// Insert or overwrite an entity
    async fn put_entity(&self, entity: &ProtectedEntity) -> anyhow::Result<()>;

    async fn get_entity(&self, id: &str) -> anyhow::Result<Option<ProtectedEntity>>;

    /// Remove an entity, returning the removed record if there was one
    async fn remove_entity(&self, id: &str) -> anyhow::Result<Option<ProtectedEntity>>;

    /// All entities, in no particular order
    async fn list_entities(&self) -> anyhow::Result<Vec<ProtectedEntity>>;

    /// Insert or overwrite a recovery task record
    async fn put_task(&self, task: &RecoveryTask) -> anyhow::Result<()>;

    async fn get_task(&self, id: &str) -> anyhow::Result<Option<RecoveryTask>>;

    async fn list_tasks(&self) -> anyhow::Result<Vec<RecoveryTask>>;
}

/// Open a registry store
///
/// `None` selects the in-memory backend; a path opens (or creates) a redb
/// database file.
pub fn open(path: Option<&Path>) -> anyhow::Result<Arc<dyn RegistryStore>> {
    match path {
        Some(path) => Ok(Arc::new(RedbStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}
