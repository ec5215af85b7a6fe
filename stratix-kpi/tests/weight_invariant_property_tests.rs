//! Property-Based Tests for the Weight Invariant Under Concurrency
//!
//! **Property: Bounded Active Weight**
//!
//! For any Initiative and any interleaving of concurrent subtask writes,
//! the sum of active Subtask weights SHALL stay at or below 100 + epsilon.
//! Every write either commits or is rejected with a typed error; none is
//! silently lost.

use std::sync::Arc;

use proptest::prelude::*;
use stratix_kpi::ProgressEngine;
use stratix_test_utils::assertions::assert_weight_invariant;
use stratix_test_utils::{
    fixtures, generators, InMemoryProgressStore, ManualClock, StratixError, Subtask,
};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const EPSILON: f64 = 0.01;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn engine_over(store: Arc<InMemoryProgressStore>) -> Arc<ProgressEngine<InMemoryProgressStore>> {
    let cache = fixtures::in_process_cache(Default::default(), Arc::new(ManualClock::starting_now()));
    let engine = ProgressEngine::new(store, Arc::new(cache), &fixtures::engine_config(Default::default()))
        .expect("default config is valid");
    Arc::new(engine)
}

/// Outcome of one write, reduced to what the property cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    Exceeded,
    Conflict,
}

fn classify<T>(result: &Result<T, StratixError>) -> Result<Outcome, TestCaseError> {
    match result {
        Ok(_) => Ok(Outcome::Committed),
        Err(StratixError::Validation(_)) => Ok(Outcome::Exceeded),
        Err(StratixError::Concurrency(_)) => Ok(Outcome::Conflict),
        Err(other) => Err(TestCaseError::fail(format!("unexpected error: {}", other))),
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Concurrent creates never push the active weight over 100.
    #[test]
    fn prop_concurrent_creates_respect_cap(
        weights in prop::collection::vec(generators::arb_weight(), 2..12),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (tenant, area) = fixtures::tenant_and_area();
            let initiative = fixtures::subtask_initiative(tenant, area);
            let id = initiative.initiative_id;
            let store = fixtures::seeded_store(initiative, vec![])
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let engine = engine_over(store.clone());

            let mut handles = Vec::with_capacity(weights.len());
            for weight in &weights {
                let engine = engine.clone();
                let subtask = Subtask::new(id, "concurrent", *weight);
                handles.push(tokio::spawn(async move {
                    engine.upsert_subtask(tenant, id, subtask).await
                }));
            }

            let mut committed_weight = 0.0;
            for (handle, weight) in handles.into_iter().zip(&weights) {
                let result = handle
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                if classify(&result)? == Outcome::Committed {
                    committed_weight += weight;
                }
            }

            let stored = store.active_weight_sum(id).await;
            prop_assert!(stored <= 100.0 + EPSILON, "active weight {}", stored);
            prop_assert!((stored - committed_weight).abs() < 1e-6);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Mixed creates, updates and removals keep the invariant.
    #[test]
    fn prop_mixed_writes_respect_cap(
        seed_weights in prop::collection::vec(5u32..=25, 1..4),
        updates in prop::collection::vec((0usize..4, 1u32..=80), 1..8),
        creates in prop::collection::vec(1u32..=50, 0..6),
        removals in prop::collection::vec(0usize..4, 0..3),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (tenant, area) = fixtures::tenant_and_area();
            let initiative = fixtures::subtask_initiative(tenant, area);
            let id = initiative.initiative_id;
            let seeds: Vec<Subtask> = seed_weights
                .iter()
                .map(|w| fixtures::subtask(id, *w as f64, 0.0))
                .collect();
            let store = fixtures::seeded_store(initiative, seeds.clone())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let engine = engine_over(store.clone());

            let mut handles = Vec::new();
            for (index, weight) in updates {
                let engine = engine.clone();
                let target = seeds[index % seeds.len()].clone().with_weight(weight as f64);
                handles.push(tokio::spawn(async move {
                    engine.upsert_subtask(tenant, id, target).await
                }));
            }
            for weight in creates {
                let engine = engine.clone();
                let subtask = fixtures::subtask(id, weight as f64, 10.0);
                handles.push(tokio::spawn(async move {
                    engine.upsert_subtask(tenant, id, subtask).await
                }));
            }
            for index in removals {
                let engine = engine.clone();
                let subtask_id = seeds[index % seeds.len()].subtask_id;
                handles.push(tokio::spawn(async move {
                    engine.remove_subtask(tenant, id, subtask_id).await
                }));
            }

            for handle in handles {
                let result = handle
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                classify(&result)?;
            }

            let stored = store.active_weight_sum(id).await;
            prop_assert!(stored <= 100.0 + EPSILON, "active weight {}", stored);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// STRESS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_writers_one_initiative() {
    let (tenant, area) = fixtures::tenant_and_area();
    let initiative = fixtures::subtask_initiative(tenant, area);
    let id = initiative.initiative_id;
    let store = fixtures::seeded_store(initiative, vec![]).await.unwrap();
    let engine = engine_over(store.clone());

    let mut handles = Vec::new();
    for _ in 0..64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .upsert_subtask(tenant, id, fixtures::subtask(id, 7.5, 50.0))
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match classify(&handle.await.unwrap()).unwrap() {
            Outcome::Committed => committed += 1,
            Outcome::Exceeded | Outcome::Conflict => {}
        }
    }

    // 13 x 7.5 = 97.5 fits, a fourteenth would not.
    assert!(committed <= 13, "committed {}", committed);
    assert!(committed >= 1);
    assert_weight_invariant(&store, id, EPSILON).await;

    let progress = engine.initiative_progress(tenant, id).await.unwrap().unwrap();
    assert_eq!(progress.active_subtasks, committed);
}
