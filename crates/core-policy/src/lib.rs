//! DR-Logic Core Policy: when to protect, and with how much bandwidth
//!
//! The policy engine is a pure function of the registry snapshot, the site
//! budgets and the clock. It performs no I/O; the control loop applies the
//! returned [`Plan`].
//!
//! # Variants
//!
//! - **fairness** (alias `dummy`, the default): urgency is the elapsed
//!   fraction of the maximum protection interval
//! - **criticality**: same rules, but the interval shrinks with the
//!   entity's [`Criticality`] weight so critical entities are protected
//!   more often
//!
//! Adding a variant adds a match arm here; the control loop does not change.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use drlogic_core_policy::{Disposition, PlanContext, PolicyEngine, SiteBudget};
//! use drlogic_core_registry::{Bandwidth, EntityKind, ProtectedEntity};
//!
//! let now = Utc::now();
//! let entity = ProtectedEntity::new("vol-1", EntityKind::Volume, "site-a", "volume_backup", now);
//! let budgets = vec![SiteBudget::new("site-a", Bandwidth(100), 0.5, 0.5)];
//! let ctx = PlanContext::new(now, Duration::hours(1), Bandwidth(10));
//!
//! let engine = PolicyEngine::from_name("dummy").unwrap();
//! let plan = engine.plan(&[entity], &budgets, &ctx);
//!
//! // Never protected: due immediately with the whole volume class budget
//! assert_eq!(plan["vol-1"].disposition, Disposition::Replicate);
//! assert_eq!(plan["vol-1"].bandwidth, Bandwidth(50));
//! ```

use chrono::{DateTime, Duration, Utc};
use drlogic_core_registry::{Criticality, ProtectedEntity, SiteId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod allocate;
pub mod budget;
pub mod decision;

pub use allocate::{split, Allocation, Candidate};
pub use budget::{SiteBudget, TrafficClass};
pub use decision::{Decision, Disposition, Plan, PlanContext};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Unknown policy engine: {0} (expected fairness, dummy or criticality)")]
    UnknownPolicy(String),

    #[error("Invalid site budget: {0}")]
    InvalidBudget(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Urgency at or above which an entity is due
pub const DUE_THRESHOLD: f64 = 1.0;

/// The protection policy, selected by name at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEngine {
    #[default]
    #[serde(alias = "dummy")]
    Fairness,
    Criticality,
}

impl PolicyEngine {
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyEngine::Fairness => "fairness",
            PolicyEngine::Criticality => "criticality",
        }
    }

    /// Protection interval that applies to `entity`
    pub fn effective_interval(&self, entity: &ProtectedEntity, ctx: &PlanContext) -> Duration {
        match self {
            PolicyEngine::Fairness => ctx.max_protection_interval,
            PolicyEngine::Criticality => {
                scale_interval(ctx.max_protection_interval, entity.criticality)
            }
        }
    }

    /// Elapsed fraction of the effective interval; `+inf` if never protected
    pub fn urgency(&self, entity: &ProtectedEntity, ctx: &PlanContext) -> f64 {
        let Some(last) = entity.last_protected_at else {
            return f64::INFINITY;
        };
        let interval = self.effective_interval(entity, ctx).num_milliseconds();
        if interval <= 0 {
            return f64::INFINITY;
        }
        let elapsed = (ctx.now - last).num_milliseconds().max(0);
        elapsed as f64 / interval as f64
    }

    /// When the next protection is due: immediately before the first one,
    /// otherwise one effective interval after the last
    pub fn next_due_at(&self, entity: &ProtectedEntity, ctx: &PlanContext) -> DateTime<Utc> {
        match entity.last_protected_at {
            Some(last) => last + self.effective_interval(entity, ctx),
            None => ctx.now,
        }
    }

    /// Decide, for every entity, whether to replicate this cycle and with
    /// how much bandwidth
    ///
    /// Entities of a site without a budget are due but deferred.
    pub fn plan(
        &self,
        entities: &[ProtectedEntity],
        budgets: &[SiteBudget],
        ctx: &PlanContext,
    ) -> Plan {
        let budgets: HashMap<&str, &SiteBudget> =
            budgets.iter().map(|b| (b.site_id.as_str(), b)).collect();

        let mut plan = Plan::new();
        let mut groups: BTreeMap<(SiteId, TrafficClass), Vec<Candidate>> = BTreeMap::new();

        for entity in entities {
            let urgency = self.urgency(entity, ctx);
            let due = urgency >= DUE_THRESHOLD;
            let disposition = if entity.flow.is_in_progress() {
                Disposition::InFlight
            } else if due {
                groups
                    .entry((entity.site_id.clone(), TrafficClass::from(entity.kind)))
                    .or_default()
                    .push(Candidate {
                        entity_id: entity.id.clone(),
                        urgency,
                    });
                // Settled by the split below
                Disposition::Deferred
            } else {
                Disposition::Wait
            };

            plan.insert(
                entity.id.clone(),
                Decision {
                    due,
                    bandwidth: Default::default(),
                    urgency,
                    next_due_at: self.next_due_at(entity, ctx),
                    disposition,
                },
            );
        }

        for ((site_id, class), candidates) in groups {
            let Some(budget) = budgets.get(site_id.as_str()) else {
                continue;
            };
            let allocation = split(candidates, budget.class_budget(class), ctx.min_flow_bandwidth);
            for (entity_id, bandwidth) in allocation.granted {
                if let Some(decision) = plan.get_mut(&entity_id) {
                    decision.bandwidth = bandwidth;
                    decision.disposition = Disposition::Replicate;
                }
            }
        }

        plan
    }
}

fn scale_interval(interval: Duration, criticality: Criticality) -> Duration {
    let millis = interval.num_milliseconds() as f64 / criticality.weight();
    Duration::milliseconds(millis.floor() as i64)
}

impl FromStr for PolicyEngine {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fairness" | "dummy" => Ok(PolicyEngine::Fairness),
            "criticality" => Ok(PolicyEngine::Criticality),
            other => Err(PolicyError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
