//! Shared value types used across the DR-Logic crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a protected VM or volume (the upstream resource id)
pub type EntityId = String;

/// Identifier of a site (primary or backup)
pub type SiteId = String;

/// Replication bandwidth, in abstract units (typically Mbit/s)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Bandwidth(pub u64);

impl Bandwidth {
    pub const ZERO: Bandwidth = Bandwidth(0);

    pub fn units(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Scale by a fraction in `[0, 1]`, rounding down
    pub fn scaled(self, fraction: f64) -> Bandwidth {
        let fraction = fraction.clamp(0.0, 1.0);
        Bandwidth((self.0 as f64 * fraction).floor() as u64)
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units", self.0)
    }
}

/// Reference to one backup artifact held by the replication engine
///
/// An artifact is the output of a completed replication action (an image
/// copy, a volume backup, ...). The newest artifact of an entity is its
/// recovery point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Engine-side artifact identifier
    pub id: String,
    /// Entity the artifact belongs to
    pub entity_id: EntityId,
    /// Creation time reported by the engine
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn new(
        id: impl Into<String>,
        entity_id: impl Into<EntityId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_id: entity_id.into(),
            created_at,
        }
    }
}
