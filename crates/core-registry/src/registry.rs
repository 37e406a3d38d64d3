//! EntityRegistry: linearizable per-entity access over a [`RegistryStore`]
//!
//! Every mutation of an entity runs under that entity's own async lock, so
//! read-modify-write cycles issued by the control loop, the cleanup loop and
//! the request handlers never interleave for the same id. There is no lock
//! across the whole registry; listings are snapshots that may mix records
//! from before and after concurrent updates.

use crate::backends::memory::MemoryStore;
use crate::error::{RegistryError, Result};
use crate::{EntityFilter, ProtectedEntity, RecoveryTask, RegistryStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Outcome of an unregister call
#[derive(Debug, Clone, PartialEq)]
pub enum Unregistered {
    /// The entity was tracked and has been removed
    Removed(Box<ProtectedEntity>),
    /// Nothing was tracked under this id
    NotFound,
}

impl Unregistered {
    pub fn was_removed(&self) -> bool {
        matches!(self, Unregistered::Removed(_))
    }
}

pub struct EntityRegistry {
    store: Arc<dyn RegistryStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Registry over a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    fn entity_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the lock of `id` unless a caller still holds or awaits it
    fn forget_lock(&self, id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    /// Start tracking an entity
    pub async fn register(&self, entity: ProtectedEntity) -> Result<()> {
        entity.validate()?;

        let lock = self.entity_lock(&entity.id);
        let _guard = lock.lock().await;

        if !self.store.insert_entity(&entity).await? {
            return Err(RegistryError::AlreadyProtected(entity.id));
        }

        info!(
            entity = %entity.id,
            kind = %entity.kind,
            site = %entity.site_id,
            "Entity registered for protection"
        );
        Ok(())
    }

    /// Stop tracking an entity. Calling it for an unknown id is not an error.
    pub async fn unregister(&self, id: &str) -> Result<Unregistered> {
        let outcome = {
            let lock = self.entity_lock(id);
            let _guard = lock.lock().await;
            self.store.remove_entity(id).await?
        };
        // Waiters queued on the old lock must keep excluding the new holders
        self.forget_lock(id);

        match outcome {
            Some(entity) => {
                info!(entity = %id, "Entity unregistered");
                Ok(Unregistered::Removed(Box::new(entity)))
            }
            None => {
                debug!(entity = %id, "Unregister requested for unknown entity");
                Ok(Unregistered::NotFound)
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProtectedEntity>> {
        Ok(self.store.get_entity(id).await?)
    }

    /// Snapshot of the matching entities, ordered by id
    pub async fn list(&self, filter: &EntityFilter) -> Result<Vec<ProtectedEntity>> {
        let mut entities: Vec<ProtectedEntity> = self
            .store
            .list_entities()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    /// Atomic read-modify-write of one entity
    ///
    /// The mutation runs on a copy; the copy is persisted only when the
    /// mutation returns `Ok`. Unknown ids yield [`RegistryError::NotFound`].
    pub async fn update<F, T>(&self, id: &str, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut ProtectedEntity) -> Result<T> + Send,
        T: Send,
    {
        let lock = self.entity_lock(id);
        let _guard = lock.lock().await;

        let mut entity = self
            .store
            .get_entity(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let value = mutation(&mut entity)?;
        self.store.put_entity(&entity).await?;
        Ok(value)
    }

    pub async fn save_task(&self, task: &RecoveryTask) -> Result<()> {
        Ok(self.store.put_task(task).await?)
    }

    pub async fn task(&self, id: &str) -> Result<Option<RecoveryTask>> {
        Ok(self.store.get_task(id).await?)
    }

    /// Recovery tasks, oldest first, optionally restricted to one site
    pub async fn tasks(&self, site_id: Option<&str>) -> Result<Vec<RecoveryTask>> {
        let mut tasks: Vec<RecoveryTask> = self
            .store
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| site_id.map_or(true, |s| s == t.site_id))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityKind;
    use chrono::Utc;

    fn volume(id: &str) -> ProtectedEntity {
        ProtectedEntity::new(id, EntityKind::Volume, "site-a", "volume_backup", Utc::now())
    }

    #[tokio::test]
    async fn test_update_is_not_persisted_on_error() {
        let registry = EntityRegistry::in_memory();
        registry.register(volume("vol-1")).await.unwrap();

        let result: Result<()> = registry
            .update("vol-1", |e| {
                e.needs_attention = true;
                Err(RegistryError::Invalid("rejected".into()))
            })
            .await;
        assert!(result.is_err());

        let stored = registry.get("vol-1").await.unwrap().unwrap();
        assert!(!stored.needs_attention);
    }

    #[tokio::test]
    async fn test_update_unknown_entity() {
        let registry = EntityRegistry::in_memory();
        let err = registry.update("ghost", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let registry = Arc::new(EntityRegistry::in_memory());
        registry.register(volume("vol-1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update("vol-1", |e| {
                        e.flow.retry_count += 1;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = registry.get("vol-1").await.unwrap().unwrap();
        assert_eq!(stored.flow.retry_count, 32);
    }

    #[tokio::test]
    async fn test_unregister_keeps_lock_while_awaited() {
        let registry = EntityRegistry::in_memory();
        registry.register(volume("vol-1")).await.unwrap();

        // A caller queued on the lock across unregister and re-register
        let queued = registry.entity_lock("vol-1");
        registry.unregister("vol-1").await.unwrap();
        registry.register(volume("vol-1")).await.unwrap();
        assert!(Arc::ptr_eq(&queued, &registry.entity_lock("vol-1")));

        drop(queued);
        registry.unregister("vol-1").await.unwrap();
        assert!(registry.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_racing_unregister_and_reregister() {
        let registry = Arc::new(EntityRegistry::in_memory());
        registry.register(volume("vol-1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    registry.unregister("vol-1").await.unwrap();
                    let _ = registry.register(volume("vol-1")).await;
                    return;
                }
                let _ = registry
                    .update("vol-1", |e| {
                        e.flow.retry_count += 1;
                        Ok(())
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.get("vol-1").await.unwrap().is_some());
    }
}
