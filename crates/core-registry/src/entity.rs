//! Protected entities and their replication flows

use crate::error::{RegistryError, Result};
use crate::types::{ArtifactRef, Bandwidth, EntityId, SiteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of resource under protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A virtual machine
    Instance,
    /// A block storage volume
    Volume,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Instance => write!(f, "instance"),
            EntityKind::Volume => write!(f, "volume"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instance" | "vm" | "server" => Ok(EntityKind::Instance),
            "volume" => Ok(EntityKind::Volume),
            _ => Err(RegistryError::Invalid(format!("unknown entity kind: {}", s))),
        }
    }
}

/// Protection state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Registered, no replication has completed yet
    Pending,
    /// At least one replication completed within the staleness SLA
    Protected,
    /// The last recovery point is older than the staleness SLA
    Stale,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Pending => write!(f, "pending"),
            EntityState::Protected => write!(f, "protected"),
            EntityState::Stale => write!(f, "stale"),
        }
    }
}

/// Business criticality, consumed by the criticality policy variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    #[default]
    Standard,
    Elevated,
    Critical,
}

impl Criticality {
    /// Protection frequency multiplier (always >= 1.0)
    pub fn weight(self) -> f64 {
        match self {
            Criticality::Standard => 1.0,
            Criticality::Elevated => 1.5,
            Criticality::Critical => 2.0,
        }
    }
}

impl FromStr for Criticality {
    type Err = RegistryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Criticality::Standard),
            "elevated" => Ok(Criticality::Elevated),
            "critical" => Ok(Criticality::Critical),
            _ => Err(RegistryError::Invalid(format!("unknown criticality: {}", s))),
        }
    }
}

/// Status of a replication flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Nothing has run yet
    Idle,
    /// Due, but deferred to a later cycle for lack of bandwidth
    Scheduled,
    /// A replication action is running
    InProgress,
    /// The last replication action completed
    Completed,
    /// The last replication action failed
    Failed,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Idle => write!(f, "idle"),
            FlowStatus::Scheduled => write!(f, "scheduled"),
            FlowStatus::InProgress => write!(f, "in_progress"),
            FlowStatus::Completed => write!(f, "completed"),
            FlowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The in-flight or most recent replication action of one entity
///
/// The flow lives inside its entity record, so every transition goes
/// through the registry's per-entity read-modify-write and two flows can
/// never be InProgress for the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFlow {
    pub entity_id: EntityId,
    /// Bandwidth allocated for the current period
    pub bandwidth: Bandwidth,
    pub status: FlowStatus,
    /// Consecutive failures since the last success
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_artifact: Option<String>,
}

impl ReplicationFlow {
    pub fn idle(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            bandwidth: Bandwidth::ZERO,
            status: FlowStatus::Idle,
            retry_count: 0,
            started_at: None,
            finished_at: None,
            last_error: None,
            last_artifact: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == FlowStatus::InProgress
    }

    /// Claim the flow for a new replication action
    pub fn begin(&mut self, bandwidth: Bandwidth, now: DateTime<Utc>) -> Result<()> {
        if self.is_in_progress() {
            return Err(RegistryError::FlowInProgress(self.entity_id.clone()));
        }
        self.status = FlowStatus::InProgress;
        self.bandwidth = bandwidth;
        self.started_at = Some(now);
        self.finished_at = None;
        Ok(())
    }

    pub fn complete(&mut self, artifact: &ArtifactRef, now: DateTime<Utc>) -> Result<()> {
        self.ensure_in_progress("complete")?;
        self.status = FlowStatus::Completed;
        self.retry_count = 0;
        self.finished_at = Some(now);
        self.last_error = None;
        self.last_artifact = Some(artifact.id.clone());
        Ok(())
    }

    /// Record a failed attempt, returning the new retry count
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<u32> {
        self.ensure_in_progress("fail")?;
        self.status = FlowStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.finished_at = Some(now);
        self.last_error = Some(reason.into());
        Ok(self.retry_count)
    }

    /// Mark a due flow as waiting for bandwidth (no-op while InProgress)
    pub fn defer(&mut self) {
        if !self.is_in_progress() {
            self.status = FlowStatus::Scheduled;
            self.bandwidth = Bandwidth::ZERO;
        }
    }

    /// Reset a flow orphaned by a process restart
    pub fn interrupt(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_in_progress() {
            return false;
        }
        self.status = FlowStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.finished_at = Some(now);
        self.last_error = Some("interrupted by restart".to_string());
        true
    }

    fn ensure_in_progress(&self, transition: &str) -> Result<()> {
        if self.is_in_progress() {
            Ok(())
        } else {
            Err(RegistryError::InvariantViolation {
                entity: self.entity_id.clone(),
                detail: format!("cannot {} a flow in status {}", transition, self.status),
            })
        }
    }
}

/// One VM or volume under protection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Site that owns the resource
    pub site_id: SiteId,
    /// Replication action type handed to the driver (e.g. `image_copy`)
    pub action: String,
    pub criticality: Criticality,
    pub created_at: DateTime<Utc>,
    /// `None` until the first replication completes
    pub last_protected_at: Option<DateTime<Utc>>,
    /// Computed by the policy engine
    pub next_due_at: DateTime<Utc>,
    pub state: EntityState,
    /// Volumes this instance is attached to (empty for volumes)
    pub depends_on: Vec<EntityId>,
    /// Set once the retry ceiling is exceeded; protection keeps being attempted
    pub needs_attention: bool,
    /// Newest artifact known to exist at the engine
    pub recovery_point: Option<ArtifactRef>,
    pub flow: ReplicationFlow,
}

impl ProtectedEntity {
    /// Create a never-protected entity, due immediately
    pub fn new(
        id: impl Into<EntityId>,
        kind: EntityKind,
        site_id: impl Into<SiteId>,
        action: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            flow: ReplicationFlow::idle(id.clone()),
            id,
            kind,
            site_id: site_id.into(),
            action: action.into(),
            criticality: Criticality::default(),
            created_at: now,
            last_protected_at: None,
            next_due_at: now,
            state: EntityState::Pending,
            depends_on: Vec::new(),
            needs_attention: false,
            recovery_point: None,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<EntityId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn with_last_protected(mut self, at: DateTime<Utc>) -> Self {
        self.last_protected_at = Some(at);
        self.state = EntityState::Protected;
        self
    }

    pub fn is_instance(&self) -> bool {
        self.kind == EntityKind::Instance
    }

    /// Structural checks applied on registration
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::Invalid("entity id must not be empty".into()));
        }
        if self.site_id.trim().is_empty() {
            return Err(RegistryError::Invalid(format!(
                "entity {} has no owning site",
                self.id
            )));
        }
        if self.kind == EntityKind::Volume && !self.depends_on.is_empty() {
            return Err(RegistryError::Invalid(format!(
                "volume {} cannot depend on other entities",
                self.id
            )));
        }
        if self.depends_on.iter().any(|dep| dep == &self.id) {
            return Err(RegistryError::Invalid(format!(
                "entity {} cannot depend on itself",
                self.id
            )));
        }
        Ok(())
    }
}

/// Filter for registry listings. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub site_id: Option<SiteId>,
    pub kind: Option<EntityKind>,
    pub state: Option<EntityState>,
    pub needs_attention: Option<bool>,
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn site(site_id: impl Into<SiteId>) -> Self {
        Self {
            site_id: Some(site_id.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_state(mut self, state: EntityState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn needing_attention(mut self) -> Self {
        self.needs_attention = Some(true);
        self
    }

    pub fn matches(&self, entity: &ProtectedEntity) -> bool {
        self.site_id.as_ref().map_or(true, |s| s == &entity.site_id)
            && self.kind.map_or(true, |k| k == entity.kind)
            && self.state.map_or(true, |s| s == entity.state)
            && self
                .needs_attention
                .map_or(true, |flag| flag == entity.needs_attention)
    }
}
