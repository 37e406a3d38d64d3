//! Control loop behaviour against the in-memory driver

use chrono::{Duration as ChronoDuration, Utc};
use drlogic_core_driver::{DriverError, MockDriver, ReplicationDriver, TimedDriver};
use drlogic_core_policy::{PolicyEngine, SiteBudget};
use drlogic_core_registry::{
    Bandwidth, EntityKind, EntityRegistry, EntityState, FlowStatus, ProtectedEntity,
};
use drlogic_sentinel::{ControlLoop, LoopPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn volume(id: &str) -> ProtectedEntity {
    ProtectedEntity::new(id, EntityKind::Volume, "site-a", "volume_backup", Utc::now())
}

fn volume_budget(total: u64) -> Vec<SiteBudget> {
    vec![SiteBudget::new("site-a", Bandwidth(total), 0.0, 1.0)]
}

async fn setup(
    driver: Arc<dyn ReplicationDriver>,
    budgets: Vec<SiteBudget>,
    policy: LoopPolicy,
    entities: Vec<ProtectedEntity>,
) -> (Arc<EntityRegistry>, ControlLoop) {
    let registry = Arc::new(EntityRegistry::in_memory());
    for entity in entities {
        registry.register(entity).await.unwrap();
    }
    let control =
        ControlLoop::new(registry.clone(), driver, PolicyEngine::Fairness, budgets, policy)
            .unwrap();
    (registry, control)
}

#[tokio::test]
async fn test_failures_then_success_updates_protection_once() {
    let driver = MockDriver::new();
    driver.fail_replications(
        "vol-1",
        [
            DriverError::Transient("engine busy".into()),
            DriverError::Timeout(Duration::from_secs(30)),
        ],
    );
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1")],
    )
    .await;

    for expected_retries in 1..=2 {
        let stats = control.run_cycle().await.unwrap();
        assert_eq!(stats.failed, 1);

        let entity = registry.get("vol-1").await.unwrap().unwrap();
        assert_eq!(entity.last_protected_at, None);
        assert_eq!(entity.flow.retry_count, expected_retries);
        assert_eq!(entity.flow.status, FlowStatus::Failed);
        assert_eq!(entity.state, EntityState::Pending);
    }

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.succeeded, 1);

    let entity = registry.get("vol-1").await.unwrap().unwrap();
    let protected_at = entity.last_protected_at.expect("protected after third cycle");
    assert_eq!(entity.flow.retry_count, 0);
    assert_eq!(entity.flow.status, FlowStatus::Completed);
    assert_eq!(entity.state, EntityState::Protected);
    assert_eq!(entity.next_due_at, protected_at + ChronoDuration::hours(1));
    assert_eq!(entity.recovery_point, driver.artifacts("vol-1").last().cloned());
    assert_eq!(driver.replication_count("vol-1"), 3);
}

#[tokio::test]
async fn test_overlapping_cycles_never_double_replicate() {
    let driver = MockDriver::new().with_delay(Duration::from_millis(50));
    let entities = (1..=5).map(|i| volume(&format!("vol-{i}"))).collect();
    let (_registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(500),
        LoopPolicy::default(),
        entities,
    )
    .await;

    let (first, second) = tokio::join!(control.run_cycle(), control.run_cycle());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.succeeded + second.succeeded, 5);
    assert_eq!(driver.replications().len(), 5);
    for i in 1..=5 {
        assert_eq!(driver.max_concurrent(&format!("vol-{i}")), 1);
    }
}

#[tokio::test]
async fn test_bandwidth_shortage_defers_lowest_priority() {
    let driver = MockDriver::new();
    let policy = LoopPolicy {
        min_flow_bandwidth: 20,
        ..Default::default()
    };
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(30),
        policy,
        vec![volume("vol-1"), volume("vol-2"), volume("vol-3")],
    )
    .await;

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.issued, 1);
    assert_eq!(stats.deferred, 2);

    let requests = driver.replications();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].entity_id, "vol-1");
    assert_eq!(requests[0].bandwidth, Bandwidth(30));

    for id in ["vol-2", "vol-3"] {
        let entity = registry.get(id).await.unwrap().unwrap();
        assert_eq!(entity.flow.status, FlowStatus::Scheduled);
    }
}

#[tokio::test]
async fn test_waiting_entity_gets_due_time_persisted() {
    let last = Utc::now() - ChronoDuration::minutes(10);
    let driver = MockDriver::new();
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1").with_last_protected(last)],
    )
    .await;

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.due, 0);
    assert_eq!(stats.issued, 0);

    let entity = registry.get("vol-1").await.unwrap().unwrap();
    assert_eq!(entity.next_due_at, last + ChronoDuration::hours(1));
    assert!(driver.replications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_engine_counts_as_failure() {
    let slow = MockDriver::new().with_delay(Duration::from_secs(120));
    let timed = TimedDriver::new(Arc::new(slow), Duration::from_secs(10));
    let (registry, control) = setup(
        Arc::new(timed),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1")],
    )
    .await;

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);

    let entity = registry.get("vol-1").await.unwrap().unwrap();
    assert_eq!(entity.flow.status, FlowStatus::Failed);
    assert!(entity.flow.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_failure_is_isolated_per_entity() {
    let driver = MockDriver::new();
    driver.fail_replications("vol-bad", [DriverError::Permanent("disk unreadable".into())]);
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-bad"), volume("vol-good")],
    )
    .await;

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);

    let good = registry.get("vol-good").await.unwrap().unwrap();
    assert_eq!(good.state, EntityState::Protected);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let driver = MockDriver::new();
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1")],
    )
    .await;

    let control = Arc::new(control);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let control = control.clone();
        let cancel = cancel.clone();
        async move { control.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await.unwrap();

    // The first tick fires immediately
    let entity = registry.get("vol-1").await.unwrap().unwrap();
    assert_eq!(entity.state, EntityState::Protected);
}

#[tokio::test]
async fn test_first_cycle_resets_flow_left_by_previous_process() {
    let driver = MockDriver::new();
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1")],
    )
    .await;
    registry
        .update("vol-1", |e| e.flow.begin(Bandwidth(10), Utc::now()))
        .await
        .unwrap();

    let stats = control.run_cycle().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(driver.replication_count("vol-1"), 1);

    let entity = registry.get("vol-1").await.unwrap().unwrap();
    assert_eq!(entity.state, EntityState::Protected);
    assert_eq!(entity.flow.status, FlowStatus::Completed);
    // The repair ran once, before the claim
    assert_eq!(control.ensure_repaired().await.unwrap(), 1);
    assert_eq!(control.recover_interrupted_flows().await.unwrap(), 0);
}

#[tokio::test]
async fn test_loop_started_during_manual_cycle_leaves_its_flow_alone() {
    let driver = MockDriver::new().with_delay(Duration::from_millis(300));
    let (registry, control) = setup(
        Arc::new(driver.clone()),
        volume_budget(100),
        LoopPolicy::default(),
        vec![volume("vol-1")],
    )
    .await;
    let control = Arc::new(control);

    let manual = tokio::spawn({
        let control = control.clone();
        async move { control.run_cycle().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cancel = CancellationToken::new();
    let looping = tokio::spawn({
        let control = control.clone();
        let cancel = cancel.clone();
        async move { control.run(cancel).await }
    });

    let stats = manual.await.unwrap().unwrap();
    assert_eq!(stats.succeeded, 1);
    cancel.cancel();
    looping.await.unwrap();

    assert_eq!(driver.replication_count("vol-1"), 1);
    assert_eq!(driver.max_concurrent("vol-1"), 1);
    let entity = registry.get("vol-1").await.unwrap().unwrap();
    assert_eq!(entity.flow.last_error, None);
}
