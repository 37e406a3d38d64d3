//! Planning inputs and outputs

use chrono::{DateTime, Duration, Utc};
use drlogic_core_registry::{Bandwidth, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Everything a plan depends on besides the entities and budgets
#[derive(Debug, Clone, PartialEq)]
pub struct PlanContext {
    pub now: DateTime<Utc>,
    pub max_protection_interval: Duration,
    /// Smallest allocation worth starting a flow for
    pub min_flow_bandwidth: Bandwidth,
}

impl PlanContext {
    pub fn new(
        now: DateTime<Utc>,
        max_protection_interval: Duration,
        min_flow_bandwidth: Bandwidth,
    ) -> Self {
        Self {
            now,
            max_protection_interval,
            min_flow_bandwidth,
        }
    }
}

/// What the control loop should do with an entity this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Due and granted bandwidth: issue a replication now
    Replicate,
    /// Not due yet
    Wait,
    /// Due, but the class budget could not give it the minimum bandwidth
    Deferred,
    /// A replication is already running for it
    InFlight,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Replicate => write!(f, "replicate"),
            Disposition::Wait => write!(f, "wait"),
            Disposition::Deferred => write!(f, "deferred"),
            Disposition::InFlight => write!(f, "in_flight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub due: bool,
    /// Allocated bandwidth, zero unless the disposition is `Replicate`
    pub bandwidth: Bandwidth,
    /// Elapsed fraction of the protection interval; infinite if never protected
    pub urgency: f64,
    pub next_due_at: DateTime<Utc>,
    pub disposition: Disposition,
}

impl Decision {
    pub fn should_replicate(&self) -> bool {
        self.disposition == Disposition::Replicate
    }
}

/// Decisions keyed by entity id
pub type Plan = BTreeMap<EntityId, Decision>;
