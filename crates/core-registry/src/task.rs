//! Recovery task records
//!
//! A [`RecoveryTask`] is the durable record of one recovery execution for a
//! site. The orchestrator is its only writer; status queries read snapshots
//! from the registry store.

use crate::entity::EntityKind;
use crate::types::{ArtifactRef, EntityId, SiteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a recovery task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    /// Some steps failed after exhausting retries, others completed
    PartiallyCompleted,
    Completed,
    /// Unrecoverable precondition, or no step completed
    Failed,
    /// Stopped by an operator; completed steps are kept
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self != TaskStatus::Running
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::PartiallyCompleted => write!(f, "partially_completed"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of a single recreation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Recreation of one entity at the backup site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    /// Steps that must complete before this one may start
    pub depends_on: Vec<EntityId>,
    /// Recovery point used for the recreation
    pub artifact: Option<ArtifactRef>,
    pub status: StepStatus,
    pub attempts: u32,
    /// Resource id returned by the engine once recreated
    pub resource_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RecoveryStep {
    pub fn new(entity_id: impl Into<EntityId>, kind: EntityKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            depends_on: Vec::new(),
            artifact: None,
            status: StepStatus::Pending,
            attempts: 0,
            resource_id: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = StepStatus::Failed;
        self.error = Some(reason.into());
        self.finished_at = Some(now);
    }
}

/// Per-status step counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StepCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.cancelled
    }
}

/// One orchestrated attempt to recreate a site's protected entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTask {
    pub id: String,
    /// Failed site whose entities are being recreated
    pub site_id: SiteId,
    /// Backup site receiving the recreated resources
    pub target_site: SiteId,
    pub status: TaskStatus,
    /// Ordered plan: volumes before the instances that use them
    pub steps: Vec<RecoveryStep>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl RecoveryTask {
    pub fn new(
        id: impl Into<String>,
        site_id: impl Into<SiteId>,
        target_site: impl Into<SiteId>,
        steps: Vec<RecoveryStep>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            site_id: site_id.into(),
            target_site: target_site.into(),
            status: TaskStatus::Running,
            steps,
            created_at: now,
            finished_at: None,
            reason: None,
        }
    }

    pub fn step(&self, entity_id: &str) -> Option<&RecoveryStep> {
        self.steps.iter().find(|s| s.entity_id == entity_id)
    }

    pub fn step_mut(&mut self, entity_id: &str) -> Option<&mut RecoveryStep> {
        self.steps.iter_mut().find(|s| s.entity_id == entity_id)
    }

    pub fn counts(&self) -> StepCounts {
        let mut counts = StepCounts::default();
        for step in &self.steps {
            match step.status {
                StepStatus::Pending => counts.pending += 1,
                StepStatus::InProgress => counts.in_progress += 1,
                StepStatus::Completed => counts.completed += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Abort before any step ran (unrecoverable precondition)
    pub fn abort(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.reason = Some(reason.into());
        self.finished_at = Some(now);
    }

    /// Derive the terminal status from the step outcomes
    pub fn finalize(&mut self, now: DateTime<Utc>) -> TaskStatus {
        let counts = self.counts();
        self.status = if counts.cancelled > 0 {
            TaskStatus::Cancelled
        } else if counts.completed == counts.total() && counts.total() > 0 {
            TaskStatus::Completed
        } else if counts.completed > 0 {
            TaskStatus::PartiallyCompleted
        } else {
            TaskStatus::Failed
        };

        if self.status == TaskStatus::Failed && self.reason.is_none() {
            self.reason = Some("no entity could be recreated".to_string());
        }
        self.finished_at = Some(now);
        self.status
    }

    pub fn summary(&self) -> String {
        let counts = self.counts();
        format!(
            "Recovery {} ({} -> {}): {} | {}/{} completed, {} failed, {} cancelled",
            self.id,
            self.site_id,
            self.target_site,
            self.status,
            counts.completed,
            counts.total(),
            counts.failed,
            counts.cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with(statuses: &[StepStatus]) -> RecoveryTask {
        let steps = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut step = RecoveryStep::new(format!("e-{}", i), EntityKind::Volume);
                step.status = *status;
                step
            })
            .collect();
        RecoveryTask::new("t-1", "site-a", "site-b", steps, Utc::now())
    }

    #[test]
    fn test_finalize_completed() {
        let mut task = task_with(&[StepStatus::Completed, StepStatus::Completed]);
        assert_eq!(task.finalize(Utc::now()), TaskStatus::Completed);
        assert!(task.finished_at.is_some());
    }

    #[test]
    fn test_finalize_partial() {
        let mut task = task_with(&[StepStatus::Completed, StepStatus::Failed]);
        assert_eq!(task.finalize(Utc::now()), TaskStatus::PartiallyCompleted);
    }

    #[test]
    fn test_finalize_nothing_completed() {
        let mut task = task_with(&[StepStatus::Failed, StepStatus::Failed]);
        assert_eq!(task.finalize(Utc::now()), TaskStatus::Failed);
        assert!(task.reason.is_some());
    }

    #[test]
    fn test_finalize_cancelled_wins() {
        let mut task = task_with(&[StepStatus::Completed, StepStatus::Cancelled]);
        assert_eq!(task.finalize(Utc::now()), TaskStatus::Cancelled);
    }

    #[test]
    fn test_counts_and_summary() {
        let task = task_with(&[
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Pending,
        ]);
        let counts = task.counts();
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.pending, 1);
        assert!(task.summary().contains("1/3 completed"));
    }
}
