//! redb backend implementation
//!
//! Pure Rust embedded database. Every mutation is a single write
//! transaction, so a crash leaves either the old or the new record.

use crate::{ProtectedEntity, RecoveryTask, RegistryStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

// Records are bincode blobs keyed by entity or task id
type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const ENTITIES_TABLE: RecordTable = TableDefinition::new("entities");
const TASKS_TABLE: RecordTable = TableDefinition::new("recovery_tasks");

/// redb-backed registry store
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a redb database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path).context("Failed to create redb database")?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _entities = write_txn.open_table(ENTITIES_TABLE)?;
            let _tasks = write_txn.open_table(TASKS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).context("Failed to serialize record")
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).context("Failed to deserialize record")
    }

    fn put(&self, table_def: RecordTable, key: &str, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table_def: RecordTable, key: &str) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;

        match table.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, table_def: RecordTable) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_key, bytes) = item?;
            records.push(Self::decode(bytes.value())?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RegistryStore for RedbStore {
    async fn insert_entity(&self, entity: &ProtectedEntity) -> Result<bool> {
        let bytes = Self::encode(entity)?;

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(ENTITIES_TABLE)?;
            let exists = table.get(entity.id.as_str())?.is_some();
            if !exists {
                table.insert(entity.id.as_str(), bytes.as_slice())?;
            }
            !exists
        };
        write_txn.commit()?;

        Ok(inserted)
    }

    async fn put_entity(&self, entity: &ProtectedEntity) -> Result<()> {
        let bytes = Self::encode(entity)?;
        self.put(ENTITIES_TABLE, &entity.id, &bytes)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<ProtectedEntity>> {
        self.get(ENTITIES_TABLE, id)
    }

    async fn remove_entity(&self, id: &str) -> Result<Option<ProtectedEntity>> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ENTITIES_TABLE)?;
            // Decode inside the scope so the guard is dropped before commit
            let record = match table.remove(id)? {
                Some(bytes) => Some(Self::decode::<ProtectedEntity>(bytes.value())?),
                None => None,
            };
            record
        };
        write_txn.commit()?;

        Ok(removed)
    }

    async fn list_entities(&self) -> Result<Vec<ProtectedEntity>> {
        self.scan(ENTITIES_TABLE)
    }

    async fn put_task(&self, task: &RecoveryTask) -> Result<()> {
        let bytes = Self::encode(task)?;
        self.put(TASKS_TABLE, &task.id, &bytes)
    }

    async fn get_task(&self, id: &str) -> Result<Option<RecoveryTask>> {
        self.get(TASKS_TABLE, id)
    }

    async fn list_tasks(&self) -> Result<Vec<RecoveryTask>> {
        self.scan(TASKS_TABLE)
    }
}
