//! Cache consistency through the engine.
//!
//! Read-your-writes, role and tenant isolation, TTL expiry, and degraded
//! reads when storage is down.

use std::sync::Arc;
use std::time::Duration;

use stratix_kpi::{InitiativeRef, MutationEvent, ProgressEngine};
use stratix_test_utils::assertions::{assert_fresh, assert_percent_eq};
use stratix_test_utils::{
    fixtures, Clock, InMemoryProgressStore, KpiCacheKey, KpiSummary, ManualClock, ReadOrigin,
    RoleClass, RoleScope, SharedMemoryTier, SummaryFilter, TierKind, UnavailableStore,
};
use uuid::Uuid;

struct Harness {
    engine: ProgressEngine<InMemoryProgressStore>,
    store: Arc<InMemoryProgressStore>,
    clock: Arc<ManualClock>,
    shared: SharedMemoryTier,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryProgressStore::new());
    let clock = Arc::new(ManualClock::starting_now());
    let shared = SharedMemoryTier::new();
    let cache = fixtures::two_tier_cache(fixtures::short_ttl_config(), shared.clone(), clock.clone());
    let engine = ProgressEngine::new(
        store.clone(),
        Arc::new(cache),
        &fixtures::engine_config(fixtures::short_ttl_config()),
    )
    .expect("config is valid");
    Harness {
        engine,
        store,
        clock,
        shared,
    }
}

// ============================================================================
// READ-YOUR-WRITES
// ============================================================================

#[tokio::test]
async fn test_write_is_visible_on_next_read_at_every_scope() {
    let h = harness();
    let (tenant, area) = fixtures::tenant_and_area();
    let initiative = fixtures::subtask_initiative(tenant, area);
    let id = initiative.initiative_id;
    h.store.insert_initiative(initiative).await;

    // Warm both tiers at area and tenant scope.
    for scope in [RoleScope::ceo(), RoleScope::manager(area)] {
        let read = h
            .engine
            .get_kpi_summary(tenant, scope, SummaryFilter::tenant_wide())
            .await;
        assert_percent_eq(read.value().average_progress, 0.0);
    }
    assert_eq!(h.shared.len(), 2);

    let subtask = fixtures::subtask(id, 100.0, 30.0);
    h.engine
        .upsert_subtask(tenant, id, subtask.clone())
        .await
        .unwrap();

    for scope in [RoleScope::ceo(), RoleScope::manager(area)] {
        let read = h
            .engine
            .get_kpi_summary(tenant, scope, SummaryFilter::tenant_wide())
            .await;
        assert_eq!(read.origin(), ReadOrigin::Computed);
        assert_percent_eq(read.value().average_progress, 30.0);
    }

    h.engine
        .upsert_subtask(tenant, id, subtask.with_progress(90.0))
        .await
        .unwrap();
    let read = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_percent_eq(read.value().average_progress, 90.0);
}

#[tokio::test]
async fn test_write_in_one_area_keeps_other_area_cached() {
    let h = harness();
    let tenant = Uuid::now_v7();
    let (area_a, area_b) = (Uuid::now_v7(), Uuid::now_v7());
    let in_a = fixtures::subtask_initiative(tenant, area_a);
    let id = in_a.initiative_id;
    h.store.insert_initiative(in_a).await;
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, area_b, 55.0))
        .await;

    h.engine
        .get_kpi_summary(tenant, RoleScope::manager(area_b), SummaryFilter::tenant_wide())
        .await;
    h.engine
        .upsert_subtask(tenant, id, fixtures::subtask(id, 50.0, 50.0))
        .await
        .unwrap();

    let read = h
        .engine
        .get_kpi_summary(tenant, RoleScope::manager(area_b), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(read.origin(), ReadOrigin::Tier(TierKind::InProcess));
    assert_percent_eq(read.value().average_progress, 55.0);
}

// ============================================================================
// ISOLATION
// ============================================================================

#[tokio::test]
async fn test_manager_is_confined_to_own_area() {
    let h = harness();
    let tenant = Uuid::now_v7();
    let (own, other) = (Uuid::now_v7(), Uuid::now_v7());
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, own, 20.0))
        .await;
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, other, 80.0))
        .await;

    // Asking for the whole tenant or for another area both yield the own area.
    for filter in [SummaryFilter::tenant_wide(), SummaryFilter::for_area(other)] {
        let read = h
            .engine
            .get_kpi_summary(tenant, RoleScope::manager(own), filter)
            .await;
        assert_fresh(&read);
        assert_eq!(read.value().area_id, Some(own));
        assert_eq!(read.value().total_initiatives, 1);
        assert_percent_eq(read.value().average_progress, 20.0);
    }

    let ceo = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(ceo.value().total_initiatives, 2);
    assert_eq!(ceo.value().area_count, 2);
    assert_percent_eq(ceo.value().average_progress, 50.0);
}

#[tokio::test]
async fn test_role_classes_never_share_entries() {
    let h = harness();
    let (tenant, area) = fixtures::tenant_and_area();
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, area, 40.0))
        .await;

    let manager_key = KpiCacheKey::new(tenant, RoleClass::Manager, &SummaryFilter::for_area(area));
    let analyst_key = KpiCacheKey::new(tenant, RoleClass::Analyst, &SummaryFilter::for_area(area));
    assert_ne!(manager_key, analyst_key);

    h.engine
        .get_kpi_summary(tenant, RoleScope::manager(area), SummaryFilter::tenant_wide())
        .await;
    assert!(h.engine.cache().get::<KpiSummary>(&manager_key).await.is_some());
    assert!(h.engine.cache().get::<KpiSummary>(&analyst_key).await.is_none());

    let analyst = h
        .engine
        .get_kpi_summary(tenant, RoleScope::analyst(), SummaryFilter::for_area(area))
        .await;
    assert_eq!(analyst.origin(), ReadOrigin::Computed);
    assert_eq!(analyst.value().role, RoleClass::Analyst);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let h = harness();
    let (tenant_a, area_a) = fixtures::tenant_and_area();
    let (tenant_b, area_b) = fixtures::tenant_and_area();
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant_a, area_a, 10.0))
        .await;
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant_b, area_b, 90.0))
        .await;

    let a = h
        .engine
        .get_kpi_summary(tenant_a, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    let b = h
        .engine
        .get_kpi_summary(tenant_b, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_percent_eq(a.value().average_progress, 10.0);
    assert_percent_eq(b.value().average_progress, 90.0);

    let report = h
        .engine
        .notify(MutationEvent::TenantReset { tenant_id: tenant_a })
        .await;
    assert!(report.is_fenced());

    let b_again = h
        .engine
        .get_kpi_summary(tenant_b, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert!(b_again.was_cache_hit());
}

// ============================================================================
// EXTERNAL MUTATIONS
// ============================================================================

#[tokio::test]
async fn test_reassignment_notification_refreshes_both_areas() {
    let h = harness();
    let tenant = Uuid::now_v7();
    let (from, to) = (Uuid::now_v7(), Uuid::now_v7());
    let initiative = fixtures::manual_initiative(tenant, from, 60.0);
    let id = initiative.initiative_id;
    h.store.insert_initiative(initiative).await;

    for area in [from, to] {
        h.engine
            .get_kpi_summary(tenant, RoleScope::manager(area), SummaryFilter::tenant_wide())
            .await;
    }

    let previous_area = h.store.reassign_area(id, to).await.unwrap();
    let report = h
        .engine
        .notify(MutationEvent::InitiativeReassigned {
            initiative: InitiativeRef {
                tenant_id: tenant,
                area_id: to,
                initiative_id: id,
            },
            previous_area,
        })
        .await;
    assert_eq!(report.patterns().len(), 3);

    let old_area = h
        .engine
        .get_kpi_summary(tenant, RoleScope::manager(from), SummaryFilter::tenant_wide())
        .await;
    let new_area = h
        .engine
        .get_kpi_summary(tenant, RoleScope::manager(to), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(old_area.value().total_initiatives, 0);
    assert_eq!(new_area.value().total_initiatives, 1);
    assert_percent_eq(new_area.value().average_progress, 60.0);
}

#[tokio::test]
async fn test_deactivated_initiative_leaves_summary_after_notify() {
    let h = harness();
    let (tenant, area) = fixtures::tenant_and_area();
    let initiative = fixtures::manual_initiative(tenant, area, 60.0);
    let id = initiative.initiative_id;
    h.store.insert_initiative(initiative).await;
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, area, 20.0))
        .await;

    let before = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(before.value().total_initiatives, 2);

    assert!(h.store.deactivate_initiative(id).await.unwrap());
    h.engine
        .notify(MutationEvent::InitiativeDeleted {
            initiative: InitiativeRef {
                tenant_id: tenant,
                area_id: area,
                initiative_id: id,
            },
        })
        .await;

    let after = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(after.value().total_initiatives, 1);
    assert_percent_eq(after.value().average_progress, 20.0);
}

// ============================================================================
// TTL AND DEGRADATION
// ============================================================================

#[tokio::test]
async fn test_expired_in_process_entry_is_served_from_shared_tier() {
    let h = harness();
    let (tenant, area) = fixtures::tenant_and_area();
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, area, 45.0))
        .await;

    h.engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;

    // Past the in-process TTL, within the distributed one.
    h.clock.advance(Duration::from_secs(2));
    let read = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(read.origin(), ReadOrigin::Tier(TierKind::Distributed));

    let promoted = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(promoted.origin(), ReadOrigin::Tier(TierKind::InProcess));

    // Past every TTL.
    h.clock.advance(Duration::from_secs(10));
    let recomputed = h
        .engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(recomputed.origin(), ReadOrigin::Computed);
}

#[tokio::test]
async fn test_storage_outage_serves_stale_then_placeholder() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Arc::new(fixtures::in_process_cache(
        fixtures::short_ttl_config(),
        clock.clone(),
    ));
    let engine = ProgressEngine::new(
        Arc::new(UnavailableStore),
        cache.clone(),
        &fixtures::engine_config(fixtures::short_ttl_config()),
    )
    .unwrap();

    let (tenant, _) = fixtures::tenant_and_area();
    let read = engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(read.origin(), ReadOrigin::Unavailable);
    assert_eq!(read.value().total_initiatives, 0);

    let key = KpiCacheKey::new(tenant, RoleClass::Ceo, &SummaryFilter::tenant_wide());
    let mut cached = KpiSummary::empty(tenant, None, RoleClass::Ceo, clock.now());
    cached.total_initiatives = 4;
    cache.set(&key, &cached, Duration::from_secs(1)).await.unwrap();

    clock.advance(Duration::from_secs(5));
    let stale = engine
        .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
        .await;
    assert_eq!(stale.origin(), ReadOrigin::Stale(TierKind::InProcess));
    assert!(stale.is_degraded());
    assert_eq!(stale.value().total_initiatives, 4);

    // Writes surface the outage instead of absorbing it.
    let id = Uuid::now_v7();
    let err = engine
        .upsert_subtask(tenant, id, fixtures::subtask(id, 10.0, 0.0))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_stats_track_hits_and_recomputes() {
    let h = harness();
    let (tenant, area) = fixtures::tenant_and_area();
    h.store
        .insert_initiative(fixtures::manual_initiative(tenant, area, 10.0))
        .await;

    for _ in 0..4 {
        h.engine
            .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
            .await;
    }
    let stats = h.engine.cache().stats();
    assert_eq!(stats.lookups, 4);
    assert_eq!(stats.recomputes, 1);
    assert_eq!(stats.hits(), 3);
    assert_eq!(stats.tier(TierKind::InProcess).unwrap().hits, 3);
}
