//! Control Loop: the protection cycle
//!
//! Every `drlogic_interval_s` the loop snapshots the registry, asks the
//! policy engine for a plan, persists the recomputed due times and issues a
//! replication for every entity the plan grants bandwidth to. Replications
//! of one cycle run concurrently; one entity's failure never holds up
//! another.

use crate::metrics::{CycleStats, CycleStatsBuilder};
use crate::policy::LoopPolicy;
use crate::{Result, SentinelError};
use chrono::{DateTime, Utc};
use drlogic_core_driver::{ReplicationDriver, ReplicationRequest};
use drlogic_core_policy::{Decision, Disposition, PlanContext, PolicyEngine, SiteBudget};
use drlogic_core_registry::{
    Bandwidth, EntityFilter, EntityRegistry, EntityState, FlowStatus, ProtectedEntity,
    RegistryError,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one entity's replication within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed { attention_raised: bool },
    /// A replication was already running
    Missed,
    /// Unregistered mid-cycle, or the flow was in an impossible state
    Skipped { invariant_violation: bool },
}

/// Periodic protection scheduler
///
/// Owns no entity state itself; every decision is re-derived from a registry
/// snapshot, so a cycle can be run manually alongside the timed loop.
pub struct ControlLoop {
    /// Source of truth for entities and their flows
    registry: Arc<EntityRegistry>,

    /// Replication engine the cycles issue work to
    driver: Arc<dyn ReplicationDriver>,

    /// Decides what is due and who gets bandwidth
    engine: PolicyEngine,

    /// Replication bandwidth of each protected site
    budgets: Vec<SiteBudget>,

    /// Loop timing and retry thresholds
    policy: LoopPolicy,

    /// Set once flows left InProgress by a previous process are reset
    repaired: OnceCell<usize>,
}

impl ControlLoop {
    pub fn new(
        registry: Arc<EntityRegistry>,
        driver: Arc<dyn ReplicationDriver>,
        engine: PolicyEngine,
        budgets: Vec<SiteBudget>,
        policy: LoopPolicy,
    ) -> Result<Self> {
        policy.validate().map_err(SentinelError::InvalidPolicy)?;
        for budget in &budgets {
            budget
                .validate()
                .map_err(|e| SentinelError::InvalidPolicy(e.to_string()))?;
        }

        Ok(Self {
            registry,
            driver,
            engine,
            budgets,
            policy,
            repaired: OnceCell::new(),
        })
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    fn context(&self, now: DateTime<Utc>) -> PlanContext {
        PlanContext::new(
            now,
            self.policy.protection_interval(),
            Bandwidth(self.policy.min_flow_bandwidth),
        )
    }

    /// Run cycles until `cancel` fires
    ///
    /// A cycle in progress always runs to completion before the loop exits,
    /// so no flow is left claimed by a dropped future.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "🛡️  DR-Logic control loop active | Policy: {} | Interval: {}s | Sites: {}",
            self.engine,
            self.policy.drlogic_interval_s,
            self.budgets.len()
        );

        let mut interval = tokio::time::interval(self.policy.cycle_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Control loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("❌ Protection cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Execute a single protection cycle
    ///
    /// Note: Public for integration testing
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        self.ensure_repaired().await?;

        let now = Utc::now();
        let ctx = self.context(now);
        debug!("🔭 Starting protection cycle");

        // Observe
        let entities = self.registry.list(&EntityFilter::all()).await?;

        // Decide
        let plan = self.engine.plan(&entities, &self.budgets, &ctx);

        let mut stats = CycleStatsBuilder::new();
        let mut issue = Vec::new();

        for entity in &entities {
            let Some(decision) = plan.get(&entity.id) else {
                continue;
            };
            stats.record_entity(decision.due);

            match decision.disposition {
                Disposition::InFlight => {
                    if decision.due {
                        stats.record_missed();
                        warn!(
                            entity = %entity.id,
                            "⏭️  Missed cycle: previous replication still running"
                        );
                    }
                }
                Disposition::Deferred => {
                    stats.record_deferred();
                    debug!(
                        entity = %entity.id,
                        urgency = decision.urgency,
                        "⏸️  Deferred: not enough bandwidth this cycle"
                    );
                    self.persist_schedule(entity, decision).await;
                }
                Disposition::Wait => {
                    self.persist_schedule(entity, decision).await;
                }
                Disposition::Replicate => {
                    stats.record_issued();
                    issue.push((entity, decision));
                }
            }
        }

        // Act
        let outcomes = join_all(
            issue
                .into_iter()
                .map(|(entity, decision)| self.protect(entity, decision, &ctx)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => stats.record_success(),
                Outcome::Failed { attention_raised } => stats.record_failure(attention_raised),
                Outcome::Missed => stats.record_missed(),
                Outcome::Skipped {
                    invariant_violation: true,
                } => stats.record_invariant_violation(),
                Outcome::Skipped { .. } => {}
            }
        }

        let stats = stats.finish();
        if stats.issued > 0 || stats.due > 0 {
            info!("📊 {}", stats.summary());
        } else {
            debug!("📊 {}", stats.summary());
        }
        if stats.attention > 0 {
            error!(
                "🚨 {} entities crossed the retry ceiling and need attention",
                stats.attention
            );
        }

        Ok(stats)
    }

    /// Persist a recomputed due time, and the Scheduled mark of a deferral
    async fn persist_schedule(&self, entity: &ProtectedEntity, decision: &Decision) {
        let deferred = decision.disposition == Disposition::Deferred;
        let unchanged = entity.next_due_at == decision.next_due_at
            && (!deferred || entity.flow.status == FlowStatus::Scheduled);
        if unchanged {
            return;
        }

        let next_due_at = decision.next_due_at;
        let result = self
            .registry
            .update(&entity.id, move |e| {
                e.next_due_at = next_due_at;
                if deferred {
                    e.flow.defer();
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => warn!(entity = %entity.id, "Failed to persist schedule: {}", e),
        }
    }

    async fn protect(
        &self,
        entity: &ProtectedEntity,
        decision: &Decision,
        ctx: &PlanContext,
    ) -> Outcome {
        let bandwidth = decision.bandwidth;
        let claim = self
            .registry
            .update(&entity.id, move |e| {
                e.flow.begin(bandwidth, ctx.now)?;
                Ok(e.clone())
            })
            .await;

        let claimed = match claim {
            Ok(claimed) => claimed,
            Err(RegistryError::FlowInProgress(_)) => {
                warn!(entity = %entity.id, "⏭️  Missed cycle: flow claimed by another cycle");
                return Outcome::Missed;
            }
            Err(RegistryError::NotFound(_)) => {
                debug!(entity = %entity.id, "Entity unregistered before replication");
                return Outcome::Skipped {
                    invariant_violation: false,
                };
            }
            Err(e) => {
                error!(entity = %entity.id, "❌ Could not claim flow: {}", e);
                return Outcome::Skipped {
                    invariant_violation: false,
                };
            }
        };

        let request = ReplicationRequest {
            entity_id: claimed.id.clone(),
            kind: claimed.kind,
            site_id: claimed.site_id.clone(),
            action: claimed.action.clone(),
            bandwidth,
        };
        debug!(entity = %request.entity_id, bandwidth = bandwidth.units(), "🚀 Replicating");

        match self.driver.replicate(&request).await {
            Ok(artifact) => self.record_success(&claimed, artifact, ctx).await,
            Err(e) => self.record_failure(&claimed, e.to_string()).await,
        }
    }

    async fn record_success(
        &self,
        entity: &ProtectedEntity,
        artifact: drlogic_core_registry::ArtifactRef,
        ctx: &PlanContext,
    ) -> Outcome {
        let engine = self.engine;
        let finished = Utc::now();
        let result = self
            .registry
            .update(&entity.id, move |e| {
                e.flow.complete(&artifact, finished)?;
                e.last_protected_at = Some(finished);
                e.state = EntityState::Protected;
                e.needs_attention = false;
                e.recovery_point = Some(artifact);
                e.next_due_at = engine.next_due_at(e, ctx);
                Ok(e.next_due_at)
            })
            .await;

        match result {
            Ok(next_due_at) => {
                info!(entity = %entity.id, next_due = %next_due_at, "✅ Protected");
                Outcome::Succeeded
            }
            Err(e) => self.settle_error(entity, e),
        }
    }

    async fn record_failure(&self, entity: &ProtectedEntity, reason: String) -> Outcome {
        let ceiling = self.policy.retry_ceiling;
        let now = Utc::now();
        let logged_reason = reason.clone();
        let result = self
            .registry
            .update(&entity.id, move |e| {
                let retries = e.flow.fail(reason, now)?;
                let raise = retries > ceiling && !e.needs_attention;
                if retries > ceiling {
                    e.needs_attention = true;
                }
                Ok((retries, raise))
            })
            .await;

        match result {
            Ok((retries, raise)) => {
                warn!(
                    entity = %entity.id,
                    retries,
                    "❌ Replication failed: {}",
                    logged_reason
                );
                if raise {
                    error!(
                        entity = %entity.id,
                        retries,
                        "🚨 Retry ceiling exceeded, entity needs attention"
                    );
                }
                Outcome::Failed {
                    attention_raised: raise,
                }
            }
            Err(e) => self.settle_error(entity, e),
        }
    }

    fn settle_error(&self, entity: &ProtectedEntity, err: RegistryError) -> Outcome {
        match err {
            RegistryError::InvariantViolation { .. } => {
                error!(entity = %entity.id, "💥 {}", err);
                Outcome::Skipped {
                    invariant_violation: true,
                }
            }
            RegistryError::NotFound(_) => {
                info!(
                    entity = %entity.id,
                    "Entity unregistered while replicating; outcome dropped"
                );
                Outcome::Skipped {
                    invariant_violation: false,
                }
            }
            other => {
                error!(entity = %entity.id, "❌ Could not record replication outcome: {}", other);
                Outcome::Skipped {
                    invariant_violation: false,
                }
            }
        }
    }

    /// Reset interrupted flows once, before this loop claims any flow
    ///
    /// Every cycle calls it first, so flows claimed by this process are never
    /// mistaken for leftovers. Returns the number of flows reset.
    pub async fn ensure_repaired(&self) -> Result<usize> {
        let reset = self
            .repaired
            .get_or_try_init(|| async {
                let reset = self.recover_interrupted_flows().await?;
                if reset > 0 {
                    warn!("⚠️  Reset {} flows interrupted by a previous shutdown", reset);
                }
                Ok::<_, SentinelError>(reset)
            })
            .await?;
        Ok(*reset)
    }

    /// Reset flows left InProgress by a previous process
    ///
    /// Only safe while this process has no flow claimed; prefer
    /// [`ensure_repaired`](Self::ensure_repaired).
    pub async fn recover_interrupted_flows(&self) -> Result<usize> {
        let now = Utc::now();
        let mut reset = 0;
        for entity in self.registry.list(&EntityFilter::all()).await? {
            if !entity.flow.is_in_progress() {
                continue;
            }
            match self
                .registry
                .update(&entity.id, move |e| Ok(e.flow.interrupt(now)))
                .await
            {
                Ok(true) => reset += 1,
                Ok(false) | Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(reset)
    }
}
