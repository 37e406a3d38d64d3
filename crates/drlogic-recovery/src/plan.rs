//! Recovery plan construction
//!
//! Orders a site's entities so every step comes after the steps it depends
//! on (volumes before the instances they are attached to), and fails up
//! front the steps that can never run.

use chrono::{DateTime, Utc};
use drlogic_core_registry::{
    ArtifactRef, EntityId, EntityKind, ProtectedEntity, RecoveryStep, StepStatus,
};
use std::collections::{HashMap, HashSet};

/// Build the ordered steps of a recovery
///
/// `points` holds the recovery point resolved for each entity; entities
/// without one get a step that is failed immediately. So does a step whose
/// dependency is not protected at this site, or that sits on a dependency
/// cycle.
pub fn build_steps(
    entities: &[ProtectedEntity],
    points: &HashMap<EntityId, ArtifactRef>,
    now: DateTime<Utc>,
) -> Vec<RecoveryStep> {
    let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut remaining: Vec<&ProtectedEntity> = entities.iter().collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut steps = Vec::with_capacity(entities.len());

    while !remaining.is_empty() {
        // Layer: everything whose known dependencies are already placed
        let (mut layer, rest): (Vec<&ProtectedEntity>, Vec<&ProtectedEntity>) =
            remaining.into_iter().partition(|e| {
                e.depends_on
                    .iter()
                    .filter(|d| known.contains(d.as_str()))
                    .all(|d| placed.contains(d.as_str()))
            });
        remaining = rest;

        let cyclic = layer.is_empty();
        if cyclic {
            layer = std::mem::take(&mut remaining);
        }
        layer.sort_by(|a, b| kind_rank(a.kind).cmp(&kind_rank(b.kind)).then(a.id.cmp(&b.id)));

        for entity in layer {
            placed.insert(entity.id.as_str());

            let mut step = RecoveryStep::new(entity.id.clone(), entity.kind);
            step.depends_on = entity.depends_on.clone();
            step.artifact = points.get(&entity.id).cloned();

            if step.artifact.is_none() {
                step.fail("no recovery point available", now);
            } else if let Some(missing) =
                entity.depends_on.iter().find(|d| !known.contains(d.as_str()))
            {
                step.fail(
                    format!(
                        "consistency error: dependency {} is not protected at this site",
                        missing
                    ),
                    now,
                );
            } else if cyclic {
                step.fail("consistency error: dependency cycle", now);
            }
            steps.push(step);
        }
    }

    steps
}

fn kind_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Volume => 0,
        EntityKind::Instance => 1,
    }
}

/// Ids of Pending steps whose dependencies have all completed
pub fn ready_steps(steps: &[RecoveryStep]) -> Vec<EntityId> {
    let status: HashMap<&str, StepStatus> = steps
        .iter()
        .map(|s| (s.entity_id.as_str(), s.status))
        .collect();

    steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .filter(|s| {
            s.depends_on
                .iter()
                .all(|d| status.get(d.as_str()) == Some(&StepStatus::Completed))
        })
        .map(|s| s.entity_id.clone())
        .collect()
}

/// Fail every Pending step with a failed or cancelled dependency
///
/// Steps are in dependency order, so one forward pass also covers chains.
/// Returns the number of steps failed.
pub fn fail_orphaned_steps(steps: &mut [RecoveryStep], now: DateTime<Utc>) -> usize {
    let mut status: HashMap<EntityId, StepStatus> = steps
        .iter()
        .map(|s| (s.entity_id.clone(), s.status))
        .collect();
    let mut failed = 0;

    for step in steps.iter_mut() {
        if step.status != StepStatus::Pending {
            continue;
        }
        let broken = step.depends_on.iter().find(|d| {
            matches!(
                status.get(d.as_str()),
                Some(StepStatus::Failed) | Some(StepStatus::Cancelled)
            )
        });
        if let Some(dep) = broken {
            step.fail(
                format!("consistency error: dependency {} was not recovered", dep),
                now,
            );
            status.insert(step.entity_id.clone(), StepStatus::Failed);
            failed += 1;
        }
    }

    failed
}
