//! Recovery Orchestrator: recreate a failed site at its backup site
//!
//! A trigger reserves the site synchronously, resolves a recovery point for
//! every protected entity, persists the task and hands it to a background
//! execution. The execution walks the step graph: a step starts once every
//! step it depends on has completed, independent steps run concurrently.

use crate::error::{RecoveryError, Result};
use crate::plan::{build_steps, fail_orphaned_steps, ready_steps};
use crate::policy::RecoveryPolicy;
use chrono::{DateTime, Utc};
use drlogic_core_driver::{RecreateRequest, ReplicationDriver};
use drlogic_core_registry::{
    ArtifactRef, EntityFilter, EntityId, EntityRegistry, ProtectedEntity, RecoveryTask, SiteId,
    StepStatus, TaskStatus,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct ActiveRecovery {
    task_id: String,
    cancel: CancellationToken,
    status: watch::Receiver<TaskStatus>,
}

type ActiveMap = Arc<Mutex<HashMap<SiteId, ActiveRecovery>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<SiteId, ActiveRecovery>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds a site's recovery slot; releases it when dropped
struct SiteReservation {
    active: ActiveMap,
    site_id: SiteId,
}

impl Drop for SiteReservation {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.site_id);
    }
}

/// Outcome of all attempts of one step
enum StepOutcome {
    Recreated(String),
    Failed(String),
    Cancelled,
}

pub struct RecoveryOrchestrator {
    registry: Arc<EntityRegistry>,
    driver: Arc<dyn ReplicationDriver>,
    policy: RecoveryPolicy,
    /// Backup site of each protected site
    backup_sites: HashMap<SiteId, SiteId>,
    active: ActiveMap,
    /// Set once tasks left Running by a previous process are failed
    repaired: OnceCell<usize>,
}

impl RecoveryOrchestrator {
    pub fn new(
        registry: Arc<EntityRegistry>,
        driver: Arc<dyn ReplicationDriver>,
        policy: RecoveryPolicy,
        backup_sites: HashMap<SiteId, SiteId>,
    ) -> Result<Self> {
        policy.validate().map_err(RecoveryError::InvalidPolicy)?;
        Ok(Self {
            registry,
            driver,
            policy,
            backup_sites,
            active: Arc::new(Mutex::new(HashMap::new())),
            repaired: OnceCell::new(),
        })
    }

    /// Start recovering `site_id`, returning the new task id
    ///
    /// Returns once the plan is persisted; progress is observed through
    /// [`status`](Self::status).
    pub async fn trigger(&self, site_id: &str) -> Result<String> {
        let target = self
            .backup_sites
            .get(site_id)
            .cloned()
            .ok_or_else(|| RecoveryError::UnknownSite(site_id.to_string()))?;
        self.ensure_repaired().await?;

        let task_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);

        // Reserve before any I/O so concurrent triggers cannot both pass
        let reservation = {
            let mut active = lock(&self.active);
            if let Some(running) = active.get(site_id) {
                return Err(RecoveryError::AlreadyRecovering {
                    site: site_id.to_string(),
                    task_id: running.task_id.clone(),
                });
            }
            active.insert(
                site_id.to_string(),
                ActiveRecovery {
                    task_id: task_id.clone(),
                    cancel: cancel.clone(),
                    status: status_rx,
                },
            );
            SiteReservation {
                active: self.active.clone(),
                site_id: site_id.to_string(),
            }
        };

        info!(site = %site_id, target = %target, task = %task_id, "🚑 Recovery triggered");

        let entities = self.registry.list(&EntityFilter::site(site_id)).await?;
        let points = self.resolve_recovery_points(&entities).await;
        let now = Utc::now();
        let steps = build_steps(&entities, &points, now);
        let mut task = RecoveryTask::new(task_id.clone(), site_id, target, steps, now);

        if points.is_empty() {
            let reason = if entities.is_empty() {
                "no protected entities at this site"
            } else {
                "no recovery point for any entity"
            };
            task.abort(reason, now);
            self.registry.save_task(&task).await?;
            error!(site = %site_id, task = %task_id, "❌ Recovery impossible: {}", reason);
            return Err(RecoveryError::NoRecoveryPoint {
                site: site_id.to_string(),
                task_id,
            });
        }

        self.registry.save_task(&task).await?;

        let execution = Execution {
            registry: self.registry.clone(),
            driver: self.driver.clone(),
            policy: self.policy.clone(),
            cancel,
        };
        tokio::spawn(async move {
            let status = execution.run(task).await;
            // Free the site before waking waiters so they can trigger again
            drop(reservation);
            let _ = status_tx.send(status);
        });

        Ok(task_id)
    }

    /// Newest artifact per entity, from the driver or, when listing fails,
    /// from the registry's last known recovery point
    async fn resolve_recovery_points(
        &self,
        entities: &[ProtectedEntity],
    ) -> HashMap<EntityId, ArtifactRef> {
        let mut points = HashMap::new();
        for entity in entities {
            let point = match self.driver.list_artifacts(&entity.id).await {
                Ok(artifacts) => artifacts.into_iter().max_by_key(|a| a.created_at),
                Err(e) => {
                    warn!(
                        entity = %entity.id,
                        "Artifact listing failed, using last known recovery point: {}",
                        e
                    );
                    entity.recovery_point.clone()
                }
            };
            match point {
                Some(point) => {
                    points.insert(entity.id.clone(), point);
                }
                None => warn!(entity = %entity.id, "No recovery point, entity cannot be recreated"),
            }
        }
        points
    }

    /// Cancel a running recovery
    ///
    /// Pending steps become Cancelled; completed steps stay, attempts in
    /// flight finish.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let token = lock(&self.active)
            .values()
            .find(|a| a.task_id == task_id)
            .map(|a| a.cancel.clone());

        if let Some(token) = token {
            info!(task = %task_id, "🛑 Recovery cancellation requested");
            token.cancel();
            return Ok(());
        }

        match self.registry.task(task_id).await? {
            Some(task) => Err(RecoveryError::NotCancellable {
                task_id: task_id.to_string(),
                status: task.status,
            }),
            None => Err(RecoveryError::TaskNotFound(task_id.to_string())),
        }
    }

    pub async fn status(&self, task_id: &str) -> Result<RecoveryTask> {
        self.registry
            .task(task_id)
            .await?
            .ok_or_else(|| RecoveryError::TaskNotFound(task_id.to_string()))
    }

    /// Recovery tasks, oldest first
    pub async fn tasks(&self, site_id: Option<&str>) -> Result<Vec<RecoveryTask>> {
        Ok(self.registry.tasks(site_id).await?)
    }

    /// Wait for a task to reach a terminal status and return its record
    pub async fn wait(&self, task_id: &str) -> Result<RecoveryTask> {
        let status = lock(&self.active)
            .values()
            .find(|a| a.task_id == task_id)
            .map(|a| a.status.clone());

        if let Some(mut status) = status {
            // A closed channel means the execution already finished
            let _ = status.wait_for(|s| s.is_terminal()).await;
        }
        self.status(task_id).await
    }

    /// Fail interrupted tasks once, before this orchestrator starts any task
    ///
    /// Every trigger calls it first, so tasks executed by this process are
    /// never mistaken for leftovers. Returns the number of tasks failed.
    pub async fn ensure_repaired(&self) -> Result<usize> {
        let reset = self
            .repaired
            .get_or_try_init(|| async {
                let reset = self.recover_interrupted_tasks().await?;
                if reset > 0 {
                    warn!(
                        "⚠️  {} recoveries interrupted by a previous shutdown marked Failed",
                        reset
                    );
                }
                Ok::<_, RecoveryError>(reset)
            })
            .await?;
        Ok(*reset)
    }

    /// Fail tasks left Running by a previous process
    ///
    /// Tasks executing in this process are skipped. Prefer
    /// [`ensure_repaired`](Self::ensure_repaired), which runs before any task
    /// can start.
    pub async fn recover_interrupted_tasks(&self) -> Result<usize> {
        let now = Utc::now();
        let mut reset = 0;
        for mut task in self.registry.tasks(None).await? {
            if task.status != TaskStatus::Running || self.is_active(&task.id) {
                continue;
            }
            for step in task.steps.iter_mut() {
                if matches!(step.status, StepStatus::Pending | StepStatus::InProgress) {
                    step.fail("interrupted by restart", now);
                }
            }
            task.abort("interrupted by restart", now);
            self.registry.save_task(&task).await?;
            warn!(
                task = %task.id,
                site = %task.site_id,
                "⚠️  Recovery interrupted by restart marked Failed"
            );
            reset += 1;
        }
        Ok(reset)
    }

    fn is_active(&self, task_id: &str) -> bool {
        lock(&self.active).values().any(|a| a.task_id == task_id)
    }
}

/// Background execution of one task
struct Execution {
    registry: Arc<EntityRegistry>,
    driver: Arc<dyn ReplicationDriver>,
    policy: RecoveryPolicy,
    cancel: CancellationToken,
}

impl Execution {
    async fn run(self, mut task: RecoveryTask) -> TaskStatus {
        let mut in_flight = FuturesUnordered::new();
        let mut cancelling = false;

        loop {
            let now = Utc::now();
            if cancelling {
                for step in task.steps.iter_mut().filter(|s| s.status == StepStatus::Pending) {
                    step.status = StepStatus::Cancelled;
                    step.finished_at = Some(now);
                }
            }

            let orphaned = fail_orphaned_steps(&mut task.steps, now);
            if orphaned > 0 {
                warn!(
                    task = %task.id,
                    "{} steps failed because a dependency was not recovered",
                    orphaned
                );
            }

            for entity_id in ready_steps(&task.steps) {
                if let Some(request) = self.start_step(&mut task, &entity_id, now) {
                    in_flight.push(attempt_step(
                        self.driver.clone(),
                        self.policy.clone(),
                        self.cancel.clone(),
                        request,
                    ));
                }
            }
            self.persist(&task).await;

            if in_flight.is_empty() {
                break;
            }

            let finished = tokio::select! {
                finished = in_flight.next() => Some(finished),
                _ = self.cancel.cancelled(), if !cancelling => None,
            };
            match finished {
                Some(Some((entity_id, attempts, outcome))) => {
                    self.finish_step(&mut task, &entity_id, attempts, outcome);
                }
                Some(None) => {}
                None => cancelling = true,
            }
        }

        let status = task.finalize(Utc::now());
        self.persist(&task).await;
        match status {
            TaskStatus::Completed => info!("✅ {}", task.summary()),
            TaskStatus::PartiallyCompleted | TaskStatus::Cancelled => {
                warn!("⚠️  {}", task.summary())
            }
            _ => error!("❌ {}", task.summary()),
        }
        status
    }

    fn start_step(
        &self,
        task: &mut RecoveryTask,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Option<RecreateRequest> {
        // Recreated ids of the dependencies, attached to the new resource
        let attachments: Vec<String> = {
            let step = task.step(entity_id)?;
            step.depends_on
                .iter()
                .filter_map(|dep| task.step(dep).and_then(|d| d.resource_id.clone()))
                .collect()
        };

        let target_site = task.target_site.clone();
        let step = task.step_mut(entity_id)?;
        let artifact = step.artifact.clone()?;
        step.status = StepStatus::InProgress;
        step.started_at = Some(now);
        debug!(entity = %entity_id, artifact = %artifact.id, "🔧 Recreating");

        Some(RecreateRequest {
            entity_id: step.entity_id.clone(),
            kind: step.kind,
            artifact,
            target_site,
            attachments,
        })
    }

    fn finish_step(
        &self,
        task: &mut RecoveryTask,
        entity_id: &str,
        attempts: u32,
        outcome: StepOutcome,
    ) {
        let now = Utc::now();
        let Some(step) = task.step_mut(entity_id) else {
            return;
        };
        step.attempts = attempts;

        match outcome {
            StepOutcome::Recreated(resource_id) => {
                info!(entity = %entity_id, resource = %resource_id, "✅ Recreated");
                step.status = StepStatus::Completed;
                step.resource_id = Some(resource_id);
                step.finished_at = Some(now);
            }
            StepOutcome::Failed(reason) => {
                error!(entity = %entity_id, attempts, "❌ Recreate failed: {}", reason);
                step.fail(reason, now);
            }
            StepOutcome::Cancelled => {
                step.status = StepStatus::Cancelled;
                step.error = Some("cancelled between retries".to_string());
                step.finished_at = Some(now);
            }
        }
    }

    async fn persist(&self, task: &RecoveryTask) {
        if let Err(e) = self.registry.save_task(task).await {
            warn!(task = %task.id, "Failed to persist recovery task: {}", e);
        }
    }
}

/// Run one step's recreate with bounded retries and exponential backoff
///
/// Permanent errors end the step at once. Cancellation is honoured between
/// attempts, never during one.
async fn attempt_step(
    driver: Arc<dyn ReplicationDriver>,
    policy: RecoveryPolicy,
    cancel: CancellationToken,
    request: RecreateRequest,
) -> (EntityId, u32, StepOutcome) {
    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        match driver.recreate(&request).await {
            Ok(resource_id) => break StepOutcome::Recreated(resource_id),
            Err(e) if !e.is_transient() => break StepOutcome::Failed(e.to_string()),
            Err(e) if attempt >= policy.step_attempts => {
                break StepOutcome::Failed(format!("{} (after {} attempts)", e, attempt))
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    entity = %request.entity_id,
                    attempt,
                    "Recreate attempt failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = cancel.cancelled() => true,
                };
                if cancelled {
                    break StepOutcome::Cancelled;
                }
            }
        }
    };
    (request.entity_id, attempt, outcome)
}
