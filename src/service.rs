/*!
 * DR-Logic service facade
 *
 * [`DrService`] owns the registry, the driver, both periodic loops and the
 * recovery orchestrator, and exposes the operations front-ends call:
 * protect, unprotect, recover and the status queries. Every call returns a
 * definitive result synchronously; long-running work (replication, recovery)
 * is observed through the status queries.
 */

use crate::config::{DrConfig, DriverKind, ReplicationActions};
use crate::error::{DrError, Result};
use chrono::Utc;
use drlogic_core_driver::{HttpDriver, MockDriver, ReplicationDriver, TimedDriver};
use drlogic_core_registry::{
    Criticality, EntityFilter, EntityId, EntityKind, EntityRegistry, ProtectedEntity, RecoveryTask,
    SiteId, Unregistered,
};
use drlogic_recovery::RecoveryOrchestrator;
use drlogic_sentinel::{CleanupLoop, CleanupStats, ControlLoop, CycleStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Request to put a VM or volume under protection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectRequest {
    pub id: EntityId,
    pub kind: EntityKind,
    pub site_id: SiteId,

    /// Replication action; the configured default for the kind if absent
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub criticality: Criticality,

    /// Volumes attached to an instance
    #[serde(default)]
    pub depends_on: Vec<EntityId>,
}

impl ProtectRequest {
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, site_id: impl Into<SiteId>) -> Self {
        Self {
            id: id.into(),
            kind,
            site_id: site_id.into(),
            action: None,
            criticality: Criticality::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }
}

/// Background loops started by [`DrService::start`]
struct RunningLoops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct DrService {
    registry: Arc<EntityRegistry>,
    control: Arc<ControlLoop>,
    cleanup: Arc<CleanupLoop>,
    orchestrator: RecoveryOrchestrator,
    actions: ReplicationActions,
    /// Sites with a configured backup site and budget
    sites: HashSet<SiteId>,
    loops: Mutex<Option<RunningLoops>>,
}

impl DrService {
    /// Build the service around an existing registry and driver
    ///
    /// The driver is wrapped so that no call outlives `driver_timeout_secs`.
    pub fn new(
        config: &DrConfig,
        registry: Arc<EntityRegistry>,
        driver: Arc<dyn ReplicationDriver>,
    ) -> Result<Self> {
        config.validate()?;

        let driver: Arc<dyn ReplicationDriver> =
            Arc::new(TimedDriver::new(driver, config.driver_timeout()));

        let control = ControlLoop::new(
            registry.clone(),
            driver.clone(),
            config.engine()?,
            config.site_budgets(),
            config.loop_policy(),
        )?;
        let cleanup = CleanupLoop::new(registry.clone(), driver.clone(), config.loop_policy())?;
        let orchestrator = RecoveryOrchestrator::new(
            registry.clone(),
            driver,
            config.recovery.clone(),
            config.backup_sites(),
        )?;

        Ok(Self {
            registry,
            control: Arc::new(control),
            cleanup: Arc::new(cleanup),
            orchestrator,
            actions: config.replication_actions.clone(),
            sites: config.sites.iter().map(|s| s.id.clone()).collect(),
            loops: Mutex::new(None),
        })
    }

    /// Open the configured store and driver and build the service
    pub fn from_config(config: &DrConfig) -> Result<Self> {
        let store = drlogic_core_registry::open(config.service.state_path.as_deref())?;
        match &config.service.state_path {
            Some(path) => info!("💾 Registry state: {}", path.display()),
            None => warn!("Registry is in-memory; protection state is lost on exit"),
        }

        let driver: Arc<dyn ReplicationDriver> = match config.driver.kind {
            DriverKind::Memory => {
                warn!("Using the in-memory replication driver; no data leaves this process");
                Arc::new(MockDriver::new())
            }
            DriverKind::Http => {
                let endpoint = config.driver.endpoint.clone().ok_or_else(|| {
                    DrError::Validation("driver.endpoint is required for the http driver".into())
                })?;
                info!("🔌 Replication engine: {}", endpoint);
                Arc::new(HttpDriver::new(endpoint, config.driver_timeout())?)
            }
        };

        Self::new(config, Arc::new(EntityRegistry::new(store)), driver)
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Reset state left behind by a previous process
    ///
    /// Interrupted flows are reset and interrupted recoveries failed, once per
    /// service. Work this process has already claimed is never touched: the
    /// first cycle and the first trigger run the same repair before claiming.
    pub async fn repair(&self) -> Result<()> {
        self.control.ensure_repaired().await?;
        self.orchestrator.ensure_repaired().await?;
        Ok(())
    }

    /// Start the control and cleanup loops
    ///
    /// State left behind by a previous process is repaired first. Calling it
    /// while the loops run is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.repair().await?;

        let cancel = CancellationToken::new();
        let control = self.control.clone();
        let cleanup = self.cleanup.clone();
        let handles = vec![
            tokio::spawn({
                let cancel = cancel.clone();
                async move { control.run(cancel).await }
            }),
            tokio::spawn({
                let cancel = cancel.clone();
                async move { cleanup.run(cancel).await }
            }),
        ];

        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        if loops.is_some() {
            // Lost a race with a concurrent start
            cancel.cancel();
            return Ok(());
        }
        *loops = Some(RunningLoops { cancel, handles });
        info!("🚀 DR-Logic service started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Stop both loops, waiting for a cycle or sweep in progress to finish
    pub async fn shutdown(&self) {
        let running = self.loops.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!("Background loop ended abnormally: {}", e);
            }
        }
        info!("DR-Logic service stopped");
    }

    /// Put an entity under protection
    ///
    /// The entity is due immediately; its first replication is issued by
    /// the next control cycle.
    pub async fn protect(&self, request: ProtectRequest) -> Result<ProtectedEntity> {
        if !self.sites.contains(&request.site_id) {
            return Err(DrError::Validation(format!(
                "site {} has no backup site configured",
                request.site_id
            )));
        }
        self.check_dependencies(&request).await?;

        let action = match request.action {
            Some(action) if !action.trim().is_empty() => action,
            Some(_) => {
                return Err(DrError::Validation(
                    "replication action must not be empty".into(),
                ))
            }
            None => self.actions.for_kind(request.kind).to_string(),
        };

        let entity =
            ProtectedEntity::new(request.id, request.kind, request.site_id, action, Utc::now())
                .with_criticality(request.criticality)
                .with_dependencies(request.depends_on);
        self.registry.register(entity.clone()).await?;
        Ok(entity)
    }

    /// Registered dependencies must be volumes at the same site; unknown
    /// ones are accepted (they may be protected later) with a warning
    async fn check_dependencies(&self, request: &ProtectRequest) -> Result<()> {
        for dep in &request.depends_on {
            match self.registry.get(dep).await? {
                Some(volume) if volume.kind != EntityKind::Volume => {
                    return Err(DrError::Validation(format!(
                        "dependency {} of {} is not a volume",
                        dep, request.id
                    )));
                }
                Some(volume) if volume.site_id != request.site_id => {
                    return Err(DrError::Validation(format!(
                        "dependency {} of {} belongs to site {}",
                        dep, request.id, volume.site_id
                    )));
                }
                Some(_) => {}
                None => warn!(
                    entity = %request.id,
                    dependency = %dep,
                    "Dependency is not protected; recovery will fail this entity until it is"
                ),
            }
        }
        Ok(())
    }

    /// Stop protecting an entity. Unknown ids report NotFound, never an error.
    pub async fn unprotect(&self, id: &str) -> Result<Unregistered> {
        Ok(self.registry.unregister(id).await?)
    }

    pub async fn entity(&self, id: &str) -> Result<ProtectedEntity> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| DrError::EntityNotFound(id.to_string()))
    }

    pub async fn entities(&self, filter: &EntityFilter) -> Result<Vec<ProtectedEntity>> {
        Ok(self.registry.list(filter).await?)
    }

    /// Start recovering a failed site at its backup site, returning the task id
    pub async fn trigger_recovery(&self, site_id: &str) -> Result<String> {
        Ok(self.orchestrator.trigger(site_id).await?)
    }

    pub async fn recovery_status(&self, task_id: &str) -> Result<RecoveryTask> {
        Ok(self.orchestrator.status(task_id).await?)
    }

    pub async fn cancel_recovery(&self, task_id: &str) -> Result<()> {
        Ok(self.orchestrator.cancel(task_id).await?)
    }

    /// Recovery tasks, optionally of one site, oldest first
    pub async fn recoveries(&self, site_id: Option<&str>) -> Result<Vec<RecoveryTask>> {
        Ok(self.orchestrator.tasks(site_id).await?)
    }

    /// Wait until a recovery task is terminal
    pub async fn wait_for_recovery(&self, task_id: &str) -> Result<RecoveryTask> {
        Ok(self.orchestrator.wait(task_id).await?)
    }

    /// Run one protection cycle now, outside the loop's schedule
    pub async fn run_protection_cycle(&self) -> Result<CycleStats> {
        Ok(self.control.run_cycle().await?)
    }

    /// Run one cleanup sweep now, outside the loop's schedule
    pub async fn run_cleanup_sweep(&self) -> Result<CleanupStats> {
        Ok(self.cleanup.run_sweep().await?)
    }
}
