//! Mock replication engine for testing
//!
//! Keeps artifacts in memory and lets tests script failures, slow calls and
//! pre-existing recovery points without a real engine.

use crate::{DriverError, RecreateRequest, ReplicationDriver, ReplicationRequest, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drlogic_core_registry::{ArtifactRef, EntityId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Observable driver call, in the order calls happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    ReplicateStarted(EntityId),
    ReplicateFinished(EntityId),
    RecreateStarted(EntityId),
    RecreateCompleted(EntityId),
    RecreateFailed(EntityId),
    ArtifactDeleted(String),
}

#[derive(Debug, Default)]
struct MockState {
    artifacts: HashMap<EntityId, Vec<ArtifactRef>>,
    replicate_failures: HashMap<EntityId, VecDeque<DriverError>>,
    recreate_failures: HashMap<EntityId, VecDeque<DriverError>>,
    broken_recreates: HashMap<EntityId, DriverError>,
    unlistable: HashSet<EntityId>,
    in_flight: HashMap<EntityId, usize>,
    max_in_flight: HashMap<EntityId, usize>,
    replications: Vec<ReplicationRequest>,
    recreations: Vec<RecreateRequest>,
    events: Vec<DriverEvent>,
    seq: u64,
}

/// In-memory [`ReplicationDriver`]
///
/// Clones share state, so a test can keep a handle while the control plane
/// owns another.
///
/// # Example
///
/// ```rust
/// use drlogic_core_driver::{DriverError, MockDriver};
///
/// let driver = MockDriver::new();
/// driver.fail_replications("vm-1", [DriverError::Transient("engine busy".into())]);
/// assert!(driver.replications().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every replicate and recreate call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue errors returned by the next replicate calls for an entity
    pub fn fail_replications(
        &self,
        entity_id: &str,
        errors: impl IntoIterator<Item = DriverError>,
    ) {
        self.state()
            .replicate_failures
            .entry(entity_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queue errors returned by the next recreate calls for an entity
    pub fn fail_recreates(&self, entity_id: &str, errors: impl IntoIterator<Item = DriverError>) {
        self.state()
            .recreate_failures
            .entry(entity_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Make every recreate call for an entity fail with `error`
    pub fn break_recreate(&self, entity_id: &str, error: DriverError) {
        self.state()
            .broken_recreates
            .insert(entity_id.to_string(), error);
    }

    /// Make artifact listing fail for an entity
    pub fn break_listing(&self, entity_id: &str) {
        self.state().unlistable.insert(entity_id.to_string());
    }

    /// Seed an existing artifact
    pub fn add_artifact(&self, entity_id: &str, created_at: DateTime<Utc>) -> ArtifactRef {
        let mut state = self.state();
        state.seq += 1;
        let artifact = ArtifactRef::new(
            format!("{}-art-{:04}", entity_id, state.seq),
            entity_id,
            created_at,
        );
        let list = state.artifacts.entry(entity_id.to_string()).or_default();
        list.push(artifact.clone());
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        artifact
    }

    /// Artifacts currently held for an entity, oldest first
    pub fn artifacts(&self, entity_id: &str) -> Vec<ArtifactRef> {
        self.state()
            .artifacts
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every replicate request received, including failed ones
    pub fn replications(&self) -> Vec<ReplicationRequest> {
        self.state().replications.clone()
    }

    pub fn replication_count(&self, entity_id: &str) -> usize {
        self.state()
            .replications
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .count()
    }

    /// Every recreate request received, including failed ones
    pub fn recreations(&self) -> Vec<RecreateRequest> {
        self.state().recreations.clone()
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.state().events.clone()
    }

    /// Highest number of simultaneous replicate calls seen for an entity
    pub fn max_concurrent(&self, entity_id: &str) -> usize {
        self.state()
            .max_in_flight
            .get(entity_id)
            .copied()
            .unwrap_or(0)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ReplicationDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn replicate(&self, request: &ReplicationRequest) -> Result<ArtifactRef> {
        {
            let mut state = self.state();
            state.replications.push(request.clone());
            state
                .events
                .push(DriverEvent::ReplicateStarted(request.entity_id.clone()));
            let running = {
                let count = state.in_flight.entry(request.entity_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let peak = state
                .max_in_flight
                .entry(request.entity_id.clone())
                .or_insert(0);
            *peak = (*peak).max(running);
        }

        self.pause().await;

        let mut state = self.state();
        if let Some(count) = state.in_flight.get_mut(&request.entity_id) {
            *count = count.saturating_sub(1);
        }
        state
            .events
            .push(DriverEvent::ReplicateFinished(request.entity_id.clone()));

        let scripted = state
            .replicate_failures
            .get_mut(&request.entity_id)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        state.seq += 1;
        let artifact = ArtifactRef::new(
            format!("{}-art-{:04}", request.entity_id, state.seq),
            request.entity_id.clone(),
            Utc::now(),
        );
        state
            .artifacts
            .entry(request.entity_id.clone())
            .or_default()
            .push(artifact.clone());
        Ok(artifact)
    }

    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRef>> {
        let state = self.state();
        if state.unlistable.contains(entity_id) {
            return Err(DriverError::Transient(format!(
                "artifact catalogue unavailable for {}",
                entity_id
            )));
        }
        Ok(state.artifacts.get(entity_id).cloned().unwrap_or_default())
    }

    async fn delete_artifact(&self, artifact: &ArtifactRef) -> Result<()> {
        let mut state = self.state();
        if let Some(list) = state.artifacts.get_mut(&artifact.entity_id) {
            list.retain(|a| a.id != artifact.id);
        }
        state
            .events
            .push(DriverEvent::ArtifactDeleted(artifact.id.clone()));
        Ok(())
    }

    async fn recreate(&self, request: &RecreateRequest) -> Result<String> {
        {
            let mut state = self.state();
            state.recreations.push(request.clone());
            state
                .events
                .push(DriverEvent::RecreateStarted(request.entity_id.clone()));
        }

        self.pause().await;

        let mut state = self.state();
        let queued = state
            .recreate_failures
            .get_mut(&request.entity_id)
            .and_then(|queue| queue.pop_front());
        let scripted = match queued {
            Some(error) => Some(error),
            None => state.broken_recreates.get(&request.entity_id).cloned(),
        };

        match scripted {
            Some(error) => {
                state
                    .events
                    .push(DriverEvent::RecreateFailed(request.entity_id.clone()));
                Err(error)
            }
            None => {
                state
                    .events
                    .push(DriverEvent::RecreateCompleted(request.entity_id.clone()));
                Ok(format!("{}@{}", request.entity_id, request.target_site))
            }
        }
    }
}
