//! Planning scenarios across whole registry snapshots

use chrono::{Duration, Utc};
use drlogic_core_policy::{Disposition, PlanContext, PolicyEngine, SiteBudget};
use drlogic_core_registry::{Bandwidth, Criticality, EntityKind, ProtectedEntity};

fn volume_protected_ago(id: &str, ago: Duration, ctx: &PlanContext) -> ProtectedEntity {
    let created = ctx.now - Duration::days(1);
    ProtectedEntity::new(id, EntityKind::Volume, "site-a", "volume_backup", created)
        .with_last_protected(ctx.now - ago)
}

fn volumes_only(total: u64) -> Vec<SiteBudget> {
    vec![SiteBudget::new("site-a", Bandwidth(total), 0.0, 1.0)]
}

#[test]
fn test_scenario_urgent_entity_takes_budget() {
    let ctx = PlanContext::new(Utc::now(), Duration::minutes(100), Bandwidth(10));
    let e1 = volume_protected_ago("E1", Duration::minutes(140), &ctx);
    let e2 = volume_protected_ago("E2", Duration::minutes(80), &ctx);

    let plan = PolicyEngine::Fairness.plan(&[e1, e2], &volumes_only(100), &ctx);

    let d1 = &plan["E1"];
    assert!(d1.due);
    assert!((d1.urgency - 1.4).abs() < 1e-9);
    assert_eq!(d1.bandwidth, Bandwidth(100));
    assert_eq!(d1.disposition, Disposition::Replicate);

    let d2 = &plan["E2"];
    assert!(!d2.due);
    assert!((d2.urgency - 0.8).abs() < 1e-9);
    assert_eq!(d2.bandwidth, Bandwidth::ZERO);
    assert_eq!(d2.disposition, Disposition::Wait);
}

#[test]
fn test_next_due_never_exceeds_interval() {
    let ctx = PlanContext::new(Utc::now(), Duration::hours(4), Bandwidth(5));
    let criticalities = [Criticality::Standard, Criticality::Elevated, Criticality::Critical];

    let mut entities = Vec::new();
    for i in 0..30i64 {
        let entity = volume_protected_ago(&format!("vol-{i:02}"), Duration::minutes(i * 17), &ctx)
            .with_criticality(criticalities[i as usize % 3]);
        entities.push(entity);
    }
    entities.push(ProtectedEntity::new(
        "vol-new",
        EntityKind::Volume,
        "site-a",
        "volume_backup",
        ctx.now,
    ));

    for engine in [PolicyEngine::Fairness, PolicyEngine::Criticality] {
        let plan = engine.plan(&entities, &volumes_only(200), &ctx);
        for entity in &entities {
            let decision = &plan[&entity.id];
            match entity.last_protected_at {
                Some(last) => assert!(
                    decision.next_due_at <= last + ctx.max_protection_interval,
                    "{} with {} exceeds the interval",
                    entity.id,
                    engine
                ),
                None => assert_eq!(decision.next_due_at, ctx.now),
            }
        }

        let granted: u64 = plan.values().map(|d| d.bandwidth.units()).sum();
        assert!(granted == 0 || granted == 200, "granted {granted} of 200");
    }
}

#[test]
fn test_in_flight_entities_get_no_bandwidth() {
    let ctx = PlanContext::new(Utc::now(), Duration::minutes(10), Bandwidth(1));
    let mut busy = volume_protected_ago("vol-busy", Duration::minutes(30), &ctx);
    busy.flow.begin(Bandwidth(50), ctx.now).unwrap();
    let idle = volume_protected_ago("vol-idle", Duration::minutes(20), &ctx);

    let plan = PolicyEngine::Fairness.plan(&[busy, idle], &volumes_only(60), &ctx);

    assert_eq!(plan["vol-busy"].disposition, Disposition::InFlight);
    assert_eq!(plan["vol-busy"].bandwidth, Bandwidth::ZERO);
    assert_eq!(plan["vol-idle"].bandwidth, Bandwidth(60));
}

#[test]
fn test_classes_and_sites_are_budgeted_separately() {
    let now = Utc::now();
    let ctx = PlanContext::new(now, Duration::hours(1), Bandwidth(1));
    let entities = vec![
        ProtectedEntity::new("vm-a", EntityKind::Instance, "site-a", "image_copy", now),
        ProtectedEntity::new("vol-a", EntityKind::Volume, "site-a", "volume_backup", now),
        ProtectedEntity::new("vol-b", EntityKind::Volume, "site-b", "volume_backup", now),
        ProtectedEntity::new("vol-c", EntityKind::Volume, "site-c", "volume_backup", now),
    ];
    let budgets = vec![
        SiteBudget::new("site-a", Bandwidth(1000), 0.6, 0.3),
        SiteBudget::new("site-b", Bandwidth(50), 0.5, 0.5),
    ];

    let plan = PolicyEngine::Fairness.plan(&entities, &budgets, &ctx);

    assert_eq!(plan["vm-a"].bandwidth, Bandwidth(600));
    assert_eq!(plan["vol-a"].bandwidth, Bandwidth(300));
    assert_eq!(plan["vol-b"].bandwidth, Bandwidth(25));
    // No budget configured for site-c
    assert!(plan["vol-c"].due);
    assert_eq!(plan["vol-c"].disposition, Disposition::Deferred);
}

#[test]
fn test_deferred_entities_are_lowest_priority() {
    let ctx = PlanContext::new(Utc::now(), Duration::minutes(60), Bandwidth(20));
    let entities = vec![
        volume_protected_ago("vol-1", Duration::minutes(180), &ctx),
        volume_protected_ago("vol-2", Duration::minutes(120), &ctx),
        volume_protected_ago("vol-3", Duration::minutes(60), &ctx),
    ];

    // Weights 3/2/1 of 60 give 30/20/10; 10 < 20 defers vol-3
    let plan = PolicyEngine::Fairness.plan(&entities, &volumes_only(60), &ctx);

    assert_eq!(plan["vol-1"].bandwidth, Bandwidth(36));
    assert_eq!(plan["vol-2"].bandwidth, Bandwidth(24));
    assert_eq!(plan["vol-3"].disposition, Disposition::Deferred);
    assert_eq!(plan["vol-3"].bandwidth, Bandwidth::ZERO);
}

#[test]
fn test_policy_name_round_trips_through_config() {
    let engine: PolicyEngine = serde_json::from_str("\"dummy\"").unwrap();
    assert_eq!(engine, PolicyEngine::Fairness);
    assert_eq!(serde_json::to_string(&PolicyEngine::Criticality).unwrap(), "\"criticality\"");
}
