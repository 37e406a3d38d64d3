//! In-memory backend
//!
//! Nothing survives the process; used by tests and by the `memory` state
//! mode of the service.

use crate::{ProtectedEntity, RecoveryTask, RegistryStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, ProtectedEntity>>,
    tasks: RwLock<HashMap<String, RecoveryTask>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn insert_entity(&self, entity: &ProtectedEntity) -> Result<bool> {
        let mut entities = self.entities.write().map_err(poisoned)?;
        if entities.contains_key(&entity.id) {
            return Ok(false);
        }
        entities.insert(entity.id.clone(), entity.clone());
        Ok(true)
    }

    async fn put_entity(&self, entity: &ProtectedEntity) -> Result<()> {
        self.entities
            .write()
            .map_err(poisoned)?
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<ProtectedEntity>> {
        Ok(self.entities.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn remove_entity(&self, id: &str) -> Result<Option<ProtectedEntity>> {
        Ok(self.entities.write().map_err(poisoned)?.remove(id))
    }

    async fn list_entities(&self) -> Result<Vec<ProtectedEntity>> {
        Ok(self
            .entities
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect())
    }

    async fn put_task(&self, task: &RecoveryTask) -> Result<()> {
        self.tasks
            .write()
            .map_err(poisoned)?
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<RecoveryTask>> {
        Ok(self.tasks.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<RecoveryTask>> {
        Ok(self.tasks.read().map_err(poisoned)?.values().cloned().collect())
    }
}
