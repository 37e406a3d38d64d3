//! Cleanup Loop: artifact expiry, recovery point reconciliation, staleness
//!
//! Runs every `clean_up_interval_s`, independently of the control loop.
//! Entities with a replication in flight are left alone for the sweep.

use crate::metrics::CleanupStats;
use crate::policy::LoopPolicy;
use crate::{Result, SentinelError};
use chrono::{DateTime, Utc};
use drlogic_core_driver::{DriverError, ReplicationDriver};
use drlogic_core_registry::{
    ArtifactRef, EntityFilter, EntityRegistry, EntityState, ProtectedEntity, RegistryError,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the registry update of one entity changed
#[derive(Debug, Default)]
struct Reconciled {
    recovery_point_cleared: Option<String>,
    became_stale: bool,
    stale: bool,
}

pub struct CleanupLoop {
    registry: Arc<EntityRegistry>,
    driver: Arc<dyn ReplicationDriver>,
    policy: LoopPolicy,
}

impl CleanupLoop {
    pub fn new(
        registry: Arc<EntityRegistry>,
        driver: Arc<dyn ReplicationDriver>,
        policy: LoopPolicy,
    ) -> Result<Self> {
        policy.validate().map_err(SentinelError::InvalidPolicy)?;
        Ok(Self {
            registry,
            driver,
            policy,
        })
    }

    /// Run sweeps until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "🧹 Cleanup loop active | Interval: {}s | Retention: {} × {}s | Staleness SLA: {}s",
            self.policy.clean_up_interval_s,
            self.policy.retention_factor,
            self.policy.max_protection_interval_s,
            self.policy.max_staleness_s
        );

        let mut interval = tokio::time::interval(self.policy.sweep_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Cleanup loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_sweep().await {
                        error!("❌ Cleanup sweep failed: {}", e);
                    }
                }
            }
        }
    }

    /// Execute a single cleanup sweep
    ///
    /// Note: Public for integration testing
    pub async fn run_sweep(&self) -> Result<CleanupStats> {
        let start = Instant::now();
        let now = Utc::now();
        let mut stats = CleanupStats::new();

        for entity in self.registry.list(&EntityFilter::all()).await? {
            if entity.flow.is_in_progress() {
                debug!(entity = %entity.id, "Replication in flight, skipped by cleanup");
                stats.skipped += 1;
                continue;
            }
            stats.scanned += 1;
            self.sweep_entity(&entity, now, &mut stats).await;
        }

        stats.duration = Some(start.elapsed());
        info!("📊 {}", stats.summary());
        if stats.stale > 0 {
            error!(
                "🚨 {} entities breached the staleness SLA; their recovery point is at risk",
                stats.stale
            );
        }
        Ok(stats)
    }

    async fn sweep_entity(
        &self,
        entity: &ProtectedEntity,
        now: DateTime<Utc>,
        stats: &mut CleanupStats,
    ) {
        let listed_at = Utc::now();
        let surviving = match self.driver.list_artifacts(&entity.id).await {
            Ok(artifacts) => Some(self.expire(entity, artifacts, now, stats).await),
            Err(e) => {
                warn!(entity = %entity.id, "Could not list artifacts: {}", e);
                stats.errors += 1;
                None
            }
        };

        let staleness = self.policy.staleness_window();
        let result = self
            .registry
            .update(&entity.id, move |e| {
                let mut reconciled = Reconciled::default();
                if e.flow.is_in_progress() {
                    return Ok(reconciled);
                }

                if let Some(surviving) = &surviving {
                    reconciled.recovery_point_cleared = reconcile(e, surviving, listed_at);
                }

                let reference = e.last_protected_at.unwrap_or(e.created_at);
                if now - reference > staleness {
                    reconciled.stale = true;
                    if e.state != EntityState::Stale {
                        e.state = EntityState::Stale;
                        reconciled.became_stale = true;
                    }
                }
                Ok(reconciled)
            })
            .await;

        match result {
            Ok(reconciled) => {
                if let Some(lost) = reconciled.recovery_point_cleared {
                    warn!(
                        entity = %entity.id,
                        artifact = %lost,
                        "Recovery point no longer known to the replication engine"
                    );
                }
                if reconciled.became_stale {
                    error!(
                        entity = %entity.id,
                        last_protected = ?entity.last_protected_at,
                        "⚠️  Staleness SLA breached"
                    );
                }
                if reconciled.stale {
                    stats.stale += 1;
                }
            }
            Err(RegistryError::NotFound(_)) => {
                debug!(entity = %entity.id, "Entity unregistered during cleanup");
            }
            Err(e) => {
                warn!(entity = %entity.id, "Could not reconcile entity: {}", e);
                stats.errors += 1;
            }
        }
    }

    /// Delete expired artifacts, returning the ones that survive (oldest first)
    async fn expire(
        &self,
        entity: &ProtectedEntity,
        mut artifacts: Vec<ArtifactRef>,
        now: DateTime<Utc>,
        stats: &mut CleanupStats,
    ) -> Vec<ArtifactRef> {
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let Some(newest) = artifacts.pop() else {
            return artifacts;
        };

        let cutoff = now - self.policy.retention_window();
        let mut surviving = Vec::with_capacity(artifacts.len() + 1);

        for artifact in artifacts {
            if artifact.created_at >= cutoff {
                stats.retained += 1;
                surviving.push(artifact);
                continue;
            }

            match self.driver.delete_artifact(&artifact).await {
                Ok(()) | Err(DriverError::NotFound(_)) => {
                    debug!(entity = %entity.id, artifact = %artifact.id, "🗑️  Artifact expired");
                    stats.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        entity = %entity.id,
                        artifact = %artifact.id,
                        "Could not delete artifact: {}",
                        e
                    );
                    stats.errors += 1;
                    stats.retained += 1;
                    surviving.push(artifact);
                }
            }
        }

        // The newest artifact is never expired
        stats.retained += 1;
        surviving.push(newest);
        surviving
    }
}

/// Align the registry recovery point with the driver's catalogue
///
/// A recovery point created after the listing was taken is kept: the control
/// loop recorded it while the sweep was running. Returns the id of a recovery
/// point that had to be dropped.
fn reconcile(
    entity: &mut ProtectedEntity,
    surviving: &[ArtifactRef],
    listed_at: DateTime<Utc>,
) -> Option<String> {
    let newest = surviving.last();
    let current = entity.recovery_point.take();

    let (kept, dropped) = match current {
        Some(point)
            if surviving.iter().any(|a| a.id == point.id) || point.created_at > listed_at =>
        {
            (Some(point), None)
        }
        Some(point) => (None, Some(point.id)),
        None => (None, None),
    };

    entity.recovery_point = match (kept, newest) {
        (Some(point), Some(newest)) if newest.created_at > point.created_at => Some(newest.clone()),
        (Some(point), _) => Some(point),
        (None, newest) => newest.cloned(),
    };
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use drlogic_core_registry::EntityKind;

    fn entity_with_point(point: Option<ArtifactRef>) -> ProtectedEntity {
        let now = Utc::now();
        let mut entity =
            ProtectedEntity::new("vol-1", EntityKind::Volume, "site-a", "volume_backup", now);
        entity.recovery_point = point;
        entity
    }

    #[test]
    fn test_reconcile_adopts_newest() {
        let now = Utc::now();
        let old = ArtifactRef::new("a-1", "vol-1", now - Duration::hours(2));
        let new = ArtifactRef::new("a-2", "vol-1", now - Duration::hours(1));
        let mut entity = entity_with_point(Some(old.clone()));

        assert_eq!(reconcile(&mut entity, &[old, new.clone()], now), None);
        assert_eq!(entity.recovery_point, Some(new));
    }

    #[test]
    fn test_reconcile_drops_unknown_point() {
        let now = Utc::now();
        let ghost = ArtifactRef::new("gone", "vol-1", now - Duration::hours(3));
        let known = ArtifactRef::new("a-1", "vol-1", now - Duration::hours(4));
        let mut entity = entity_with_point(Some(ghost));

        assert_eq!(reconcile(&mut entity, &[known.clone()], now), Some("gone".to_string()));
        assert_eq!(entity.recovery_point, Some(known));

        let gone = ArtifactRef::new("gone", "vol-1", now - Duration::hours(3));
        let mut empty = entity_with_point(Some(gone));
        assert!(reconcile(&mut empty, &[], now).is_some());
        assert_eq!(empty.recovery_point, None);
    }

    #[test]
    fn test_reconcile_keeps_point_newer_than_listing() {
        let listed_at = Utc::now();
        let fresh = ArtifactRef::new("a-9", "vol-1", listed_at + Duration::seconds(1));
        let mut entity = entity_with_point(Some(fresh.clone()));

        assert_eq!(reconcile(&mut entity, &[], listed_at), None);
        assert_eq!(entity.recovery_point, Some(fresh));
    }
}
