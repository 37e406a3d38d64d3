//! Per-site bandwidth budgets and traffic classes

use crate::{PolicyError, Result};
use drlogic_core_registry::{Bandwidth, EntityKind, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Replication traffic class. Ordinary site operation is the implicit
/// third class: whatever share is left over is reserved for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
    Instance,
    Volume,
}

impl From<EntityKind> for TrafficClass {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Instance => TrafficClass::Instance,
            EntityKind::Volume => TrafficClass::Volume,
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::Instance => write!(f, "instance"),
            TrafficClass::Volume => write!(f, "volume"),
        }
    }
}

/// Aggregate replication bandwidth of one primary/backup site pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteBudget {
    pub site_id: SiteId,
    pub total: Bandwidth,
    /// Fraction of `total` for instance replication
    pub instance_share: f64,
    /// Fraction of `total` for volume replication
    pub volume_share: f64,
}

impl SiteBudget {
    pub fn new(
        site_id: impl Into<SiteId>,
        total: Bandwidth,
        instance_share: f64,
        volume_share: f64,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            total,
            instance_share,
            volume_share,
        }
    }

    pub fn share(&self, class: TrafficClass) -> f64 {
        match class {
            TrafficClass::Instance => self.instance_share,
            TrafficClass::Volume => self.volume_share,
        }
    }

    /// Bandwidth available to one traffic class, rounded down
    pub fn class_budget(&self, class: TrafficClass) -> Bandwidth {
        self.total.scaled(self.share(class))
    }

    /// Share left for ordinary site operation
    pub fn operation_share(&self) -> f64 {
        (1.0 - self.instance_share - self.volume_share).max(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.site_id.trim().is_empty() {
            return Err(PolicyError::InvalidBudget("site id must not be empty".into()));
        }

        for (name, share) in [
            ("instance_share", self.instance_share),
            ("volume_share", self.volume_share),
        ] {
            if !(0.0..=1.0).contains(&share) {
                return Err(PolicyError::InvalidBudget(format!(
                    "site {}: {} must be within [0, 1], got {}",
                    self.site_id, name, share
                )));
            }
        }

        if self.instance_share + self.volume_share > 1.0 + f64::EPSILON {
            return Err(PolicyError::InvalidBudget(format!(
                "site {}: replication shares sum above 1",
                self.site_id
            )));
        }

        Ok(())
    }
}
