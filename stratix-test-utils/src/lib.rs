//! Stratix Test Utilities
//!
//! Centralized test infrastructure for all Stratix crates:
//! - Proptest generators for entity types
//! - Fixtures for stores, caches and engines
//! - Fault-injecting tiers and stores
//! - Custom assertions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Barrier, Notify};

// Re-export core types for convenience
pub use stratix_core::*;
pub use stratix_storage::{
    CacheManager, CacheRead, CacheTier, CommitOutcome, InMemoryProgressStore, InProcessTier,
    KeyPattern, KpiCacheKey, ProgressStore, ReadOrigin, SharedMemoryTier, SubtaskWrite, TierEntry,
    TierKind,
};

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Stratix entity types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    // === Identity Generators ===

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a valid UUIDv7 (timestamp-sortable).
    pub fn arb_uuid_v7() -> impl Strategy<Value = Uuid> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    // === Enum Generators ===

    pub fn arb_progress_method() -> impl Strategy<Value = ProgressMethod> {
        prop_oneof![
            Just(ProgressMethod::Manual),
            Just(ProgressMethod::SubtaskBased),
            Just(ProgressMethod::Hybrid),
        ]
    }

    pub fn arb_role_class() -> impl Strategy<Value = RoleClass> {
        prop_oneof![
            Just(RoleClass::Ceo),
            Just(RoleClass::Admin),
            Just(RoleClass::Manager),
            Just(RoleClass::Analyst),
        ]
    }

    pub fn arb_initiative_status() -> impl Strategy<Value = InitiativeStatus> {
        prop_oneof![
            Just(InitiativeStatus::Planning),
            Just(InitiativeStatus::InProgress),
            Just(InitiativeStatus::OnHold),
            Just(InitiativeStatus::Completed),
            Just(InitiativeStatus::Cancelled),
        ]
    }

    // === Value Generators ===

    /// Progress in [0, 100] with two decimals.
    pub fn arb_progress() -> impl Strategy<Value = f64> {
        (0u32..=10_000).prop_map(|hundredths| hundredths as f64 / 100.0)
    }

    /// Weight in (0, 100] with two decimals.
    pub fn arb_weight() -> impl Strategy<Value = f64> {
        (1u32..=10_000).prop_map(|hundredths| hundredths as f64 / 100.0)
    }

    /// Active subtasks whose weights sum to at most 100.
    ///
    /// Weights are drawn as whole percents and the set is cut as soon as the
    /// next weight would overflow.
    pub fn arb_subtask_set(initiative_id: InitiativeId) -> impl Strategy<Value = Vec<Subtask>> {
        prop::collection::vec((1u32..=60, arb_progress()), 0..8).prop_map(move |drawn| {
            let mut remaining = 100u32;
            drawn
                .into_iter()
                .take_while(|(weight, _)| {
                    if *weight <= remaining {
                        remaining -= weight;
                        true
                    } else {
                        false
                    }
                })
                .enumerate()
                .map(|(i, (weight, progress))| {
                    Subtask::new(initiative_id, format!("subtask-{}", i), weight as f64)
                        .with_progress(progress)
                })
                .collect()
        })
    }

    /// An active Initiative in the given tenant and area.
    pub fn arb_initiative(tenant_id: TenantId, area_id: AreaId) -> impl Strategy<Value = Initiative> {
        (
            arb_progress_method(),
            arb_progress(),
            arb_initiative_status(),
            prop::option::of(1u32..=5),
            prop::option::of((1_000u32..100_000, 0u32..120_000)),
        )
            .prop_map(move |(method, progress, status, strategic, budget)| {
                let mut initiative = Initiative::new(tenant_id, area_id, "generated")
                    .with_method(method)
                    .with_progress(progress)
                    .with_status(status);
                if let Some(factor) = strategic {
                    initiative = initiative.strategic(factor as f64);
                }
                if let Some((budget, spent)) = budget {
                    initiative = initiative.with_budget(budget as f64, spent as f64);
                }
                initiative
            })
    }

    /// An Initiative together with a subtask set that respects the weight
    /// invariant.
    pub fn arb_initiative_with_subtasks(
        tenant_id: TenantId,
        area_id: AreaId,
    ) -> impl Strategy<Value = (Initiative, Vec<Subtask>)> {
        arb_initiative(tenant_id, area_id).prop_flat_map(|initiative| {
            let id = initiative.initiative_id;
            (Just(initiative), arb_subtask_set(id))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use uuid::Uuid;

    /// Cache config with short TTLs, for tests that expire entries.
    pub fn short_ttl_config() -> CacheTierConfig {
        CacheTierConfig {
            in_process_ttl: Duration::from_secs(1),
            distributed_ttl: Duration::from_secs(5),
            persistent_ttl: Duration::from_secs(30),
            tier_timeout: Duration::from_millis(50),
            in_process_capacity: 256,
            maintenance_interval: Duration::from_secs(10),
        }
    }

    /// Engine config with default thresholds and the given cache config.
    pub fn engine_config(cache: CacheTierConfig) -> EngineConfig {
        EngineConfig {
            cache,
            ..EngineConfig::default()
        }
    }

    /// Cache manager with an in-process tier and the given shared tier.
    pub fn two_tier_cache(
        config: CacheTierConfig,
        shared: SharedMemoryTier,
        clock: Arc<dyn Clock>,
    ) -> CacheManager {
        CacheManager::builder(config.clone())
            .with_tier(Arc::new(InProcessTier::new(config.in_process_capacity)))
            .with_tier(Arc::new(shared))
            .with_clock(clock)
            .build()
    }

    /// Cache manager with only an in-process tier.
    pub fn in_process_cache(config: CacheTierConfig, clock: Arc<dyn Clock>) -> CacheManager {
        CacheManager::builder(config.clone())
            .with_tier(Arc::new(InProcessTier::new(config.in_process_capacity)))
            .with_clock(clock)
            .build()
    }

    /// Manual Initiative with a stored progress value.
    pub fn manual_initiative(tenant_id: TenantId, area_id: AreaId, progress: f64) -> Initiative {
        Initiative::new(tenant_id, area_id, "manual").with_progress(progress)
    }

    /// Subtask-based Initiative with no subtasks yet.
    pub fn subtask_initiative(tenant_id: TenantId, area_id: AreaId) -> Initiative {
        Initiative::new(tenant_id, area_id, "subtask-based").with_method(ProgressMethod::SubtaskBased)
    }

    /// Hybrid Initiative with a manual fallback value.
    pub fn hybrid_initiative(tenant_id: TenantId, area_id: AreaId, manual: f64) -> Initiative {
        Initiative::new(tenant_id, area_id, "hybrid")
            .with_method(ProgressMethod::Hybrid)
            .with_progress(manual)
    }

    /// Subtask with a weight and progress.
    pub fn subtask(initiative_id: InitiativeId, weight: f64, progress: f64) -> Subtask {
        Subtask::new(initiative_id, "subtask", weight).with_progress(progress)
    }

    /// Store holding one Initiative and its subtasks, seeded without
    /// validation.
    pub async fn seeded_store(
        initiative: Initiative,
        subtasks: Vec<Subtask>,
    ) -> StratixResult<Arc<InMemoryProgressStore>> {
        let store = Arc::new(InMemoryProgressStore::new());
        store.insert_initiative(initiative).await;
        for subtask in subtasks {
            store.insert_subtask(subtask).await?;
        }
        Ok(store)
    }

    /// Fresh tenant and area ids.
    pub fn tenant_and_area() -> (TenantId, AreaId) {
        (Uuid::now_v7(), Uuid::now_v7())
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Tier that fails every call, as if its backing service were down.
#[derive(Debug, Clone, Copy)]
pub struct OfflineTier {
    kind: TierKind,
}

impl OfflineTier {
    pub fn new(kind: TierKind) -> Self {
        Self { kind }
    }

    fn refuse(&self) -> CacheError {
        CacheError::TierUnavailable {
            tier: self.kind.to_string(),
            reason: "offline".to_string(),
        }
    }
}

#[async_trait]
impl CacheTier for OfflineTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, _key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError> {
        Err(self.refuse())
    }

    async fn set(&self, _key: &KpiCacheKey, _entry: TierEntry) -> Result<(), CacheError> {
        Err(self.refuse())
    }

    async fn invalidate(&self, _pattern: &KeyPattern) -> Result<u64, CacheError> {
        Err(self.refuse())
    }
}

/// Tier that answers every call only after `delay`, always empty.
#[derive(Debug, Clone, Copy)]
pub struct SlowTier {
    kind: TierKind,
    delay: Duration,
}

impl SlowTier {
    pub fn new(kind: TierKind, delay: Duration) -> Self {
        Self { kind, delay }
    }
}

#[async_trait]
impl CacheTier for SlowTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn get(&self, _key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn set(&self, _key: &KpiCacheKey, _entry: TierEntry) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn invalidate(&self, _pattern: &KeyPattern) -> Result<u64, CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(0)
    }
}

/// Store wrapper that holds the first `gated` subtask fetches at a barrier
/// until all of them have arrived.
///
/// Forces concurrent writers to validate against the same snapshot, which
/// reproduces the read-validate-commit race deterministically.
pub struct GatedStore {
    inner: Arc<InMemoryProgressStore>,
    barrier: Barrier,
    gated: usize,
    fetches: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<InMemoryProgressStore>, gated: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(gated.max(1)),
            gated,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryProgressStore> {
        &self.inner
    }

    /// Subtask fetches seen so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressStore for GatedStore {
    async fn fetch_initiatives(
        &self,
        tenant_id: TenantId,
        filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>> {
        self.inner.fetch_initiatives(tenant_id, filter).await
    }

    async fn fetch_initiative(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>> {
        self.inner.fetch_initiative(tenant_id, initiative_id).await
    }

    async fn fetch_subtasks(&self, initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>> {
        let seen = self.fetches.fetch_add(1, Ordering::SeqCst);
        let subtasks = self.inner.fetch_subtasks(initiative_id).await?;
        if seen < self.gated {
            self.barrier.wait().await;
        }
        Ok(subtasks)
    }

    async fn commit_subtask_write(
        &self,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
        expected: Revision,
    ) -> StratixResult<CommitOutcome> {
        self.inner
            .commit_subtask_write(initiative_id, write, expected)
            .await
    }

    async fn record_initiative_progress(
        &self,
        initiative_id: InitiativeId,
        percent: f64,
        at: Revision,
    ) -> StratixResult<bool> {
        self.inner
            .record_initiative_progress(initiative_id, percent, at)
            .await
    }
}

/// Store wrapper that holds the first derived-progress write-back for
/// `delay`, so a later writer's write-back can land before it.
pub struct DelayedWriteBackStore {
    inner: Arc<InMemoryProgressStore>,
    delay: Duration,
    write_backs: AtomicUsize,
    stalled: Notify,
}

impl DelayedWriteBackStore {
    pub fn new(inner: Arc<InMemoryProgressStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            write_backs: AtomicUsize::new(0),
            stalled: Notify::new(),
        }
    }

    /// Resolves once the first write-back has started waiting.
    pub async fn first_write_back_stalled(&self) {
        self.stalled.notified().await;
    }
}

#[async_trait]
impl ProgressStore for DelayedWriteBackStore {
    async fn fetch_initiatives(
        &self,
        tenant_id: TenantId,
        filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>> {
        self.inner.fetch_initiatives(tenant_id, filter).await
    }

    async fn fetch_initiative(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>> {
        self.inner.fetch_initiative(tenant_id, initiative_id).await
    }

    async fn fetch_subtasks(&self, initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>> {
        self.inner.fetch_subtasks(initiative_id).await
    }

    async fn commit_subtask_write(
        &self,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
        expected: Revision,
    ) -> StratixResult<CommitOutcome> {
        self.inner
            .commit_subtask_write(initiative_id, write, expected)
            .await
    }

    async fn record_initiative_progress(
        &self,
        initiative_id: InitiativeId,
        percent: f64,
        at: Revision,
    ) -> StratixResult<bool> {
        if self.write_backs.fetch_add(1, Ordering::SeqCst) == 0 {
            self.stalled.notify_one();
            tokio::time::sleep(self.delay).await;
        }
        self.inner
            .record_initiative_progress(initiative_id, percent, at)
            .await
    }
}

/// Store whose reads all fail, as if the database were unreachable.
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn refuse<T>() -> StratixResult<T> {
        Err(StorageError::Unavailable {
            reason: "database unreachable".to_string(),
        }
        .into())
    }
}

#[async_trait]
impl ProgressStore for UnavailableStore {
    async fn fetch_initiatives(
        &self,
        _tenant_id: TenantId,
        _filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>> {
        Self::refuse()
    }

    async fn fetch_initiative(
        &self,
        _tenant_id: TenantId,
        _initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>> {
        Self::refuse()
    }

    async fn fetch_subtasks(&self, _initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>> {
        Self::refuse()
    }

    async fn commit_subtask_write(
        &self,
        _initiative_id: InitiativeId,
        _write: SubtaskWrite,
        _expected: Revision,
    ) -> StratixResult<CommitOutcome> {
        Self::refuse()
    }

    async fn record_initiative_progress(
        &self,
        _initiative_id: InitiativeId,
        _percent: f64,
        _at: Revision,
    ) -> StratixResult<bool> {
        Self::refuse()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Stratix-specific validation.

    use super::*;

    /// Assert two percentages are equal to two decimals.
    #[track_caller]
    pub fn assert_percent_eq(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.005,
            "Expected {:.2}%, got {:.2}%",
            expected,
            actual
        );
    }

    /// Assert a result is a `WeightExceeded` rejection.
    #[track_caller]
    pub fn assert_weight_exceeded<T: std::fmt::Debug>(result: &StratixResult<T>) {
        match result {
            Err(StratixError::Validation(ValidationError::WeightExceeded { .. })) => {}
            other => panic!("Expected WeightExceeded, got: {:?}", other),
        }
    }

    /// Assert a result is a `WeightConflict` rejection.
    #[track_caller]
    pub fn assert_weight_conflict<T: std::fmt::Debug>(result: &StratixResult<T>) {
        match result {
            Err(StratixError::Concurrency(ConcurrencyError::WeightConflict { .. })) => {}
            other => panic!("Expected WeightConflict, got: {:?}", other),
        }
    }

    /// Assert the active weight of an Initiative respects the 100% cap.
    pub async fn assert_weight_invariant(
        store: &InMemoryProgressStore,
        initiative_id: InitiativeId,
        epsilon: f64,
    ) {
        let total = store.active_weight_sum(initiative_id).await;
        assert!(
            total <= 100.0 + epsilon,
            "Active weight {} exceeds 100 for initiative {}",
            total,
            initiative_id
        );
    }

    /// Assert a read was not degraded.
    #[track_caller]
    pub fn assert_fresh<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(
            !read.is_degraded(),
            "Expected a fresh read, got origin {:?}",
            read.origin()
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
