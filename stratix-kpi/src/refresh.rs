//! Throttled Aggregate Refresh Task
//!
//! Re-warms the executive (tenant-wide) summary of tenants that just changed,
//! so the first dashboard read after a burst of writes is a cache hit.
//! Requests for one tenant are coalesced and served at most once per
//! `refresh_throttle`. Correctness never depends on this task: a missed
//! refresh only costs one recompute on the next read.
//!
//! The same task runs [`stratix_storage::CacheManager::maintain`] every
//! `cache.maintenance_interval`, so expired entries leave every tier.
//!
//! # Usage
//!
//! ```ignore
//! let (handle, requests) = refresh_channel();
//! let engine = Arc::new(ProgressEngine::new(store, cache, &config)?.with_refresh(handle));
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let task = tokio::spawn(aggregate_refresh_task(engine.clone(), config, requests, shutdown_rx));
//!
//! // Every write and notification now requests a refresh for its tenant.
//! engine.upsert_subtask(tenant_id, initiative_id, subtask).await?;
//!
//! let _ = shutdown_tx.send(true);
//! let metrics = task.await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stratix_core::{EngineConfig, RoleScope, SummaryFilter, TenantId};
use stratix_storage::ProgressStore;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::ProgressEngine;

/// Shortest flush period, so a zero throttle does not spin.
const MIN_FLUSH_PERIOD: Duration = Duration::from_millis(10);

/// Sender side of the refresh queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<TenantId>,
}

impl RefreshHandle {
    /// Ask for `tenant_id` to be re-warmed. Returns false once the task has
    /// stopped.
    pub fn request(&self, tenant_id: TenantId) -> bool {
        self.tx.send(tenant_id).is_ok()
    }
}

/// Create a refresh queue.
pub fn refresh_channel() -> (RefreshHandle, mpsc::UnboundedReceiver<TenantId>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RefreshHandle { tx }, rx)
}

/// Counters for refresh activity.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Requests received
    pub requests: AtomicU64,
    /// Summaries re-warmed
    pub refreshes: AtomicU64,
    /// Requests that arrived inside a tenant's throttle window
    pub deferred: AtomicU64,
    /// Refreshes that could only produce a degraded summary
    pub degraded: AtomicU64,
    /// Expired cache entries purged by maintenance passes
    pub purged: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RefreshMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub requests: u64,
    pub refreshes: u64,
    pub deferred: u64,
    pub degraded: u64,
    pub purged: u64,
}

struct Throttle {
    window: Duration,
    last_refresh: HashMap<TenantId, Instant>,
    pending: HashSet<TenantId>,
}

impl Throttle {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_refresh: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    fn is_due(&self, tenant_id: &TenantId, now: Instant) -> bool {
        self.last_refresh
            .get(tenant_id)
            .map_or(true, |last| now.duration_since(*last) >= self.window)
    }

    /// Take the pending tenants whose window has passed.
    fn take_due(&mut self, now: Instant) -> Vec<TenantId> {
        let due: Vec<TenantId> = self
            .pending
            .iter()
            .filter(|t| self.is_due(t, now))
            .copied()
            .collect();
        for tenant_id in &due {
            self.pending.remove(tenant_id);
            self.last_refresh.insert(*tenant_id, now);
        }
        due
    }
}

/// Background task that re-warms tenant-wide summaries on request and
/// purges expired cache entries.
///
/// Runs until the shutdown signal is received or every [`RefreshHandle`]
/// is dropped.
///
/// # Arguments
///
/// * `engine` - Engine whose cache gets warmed
/// * `config` - Engine configuration, for `refresh_throttle` and
///   `cache.maintenance_interval`
/// * `requests` - Receiver from [`refresh_channel`]
/// * `shutdown_rx` - Watch receiver for shutdown signal
///
/// # Returns
///
/// Metrics collected during the task's lifetime
pub async fn aggregate_refresh_task<S>(
    engine: Arc<ProgressEngine<S>>,
    config: EngineConfig,
    mut requests: mpsc::UnboundedReceiver<TenantId>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics>
where
    S: ProgressStore + 'static,
{
    let metrics = Arc::new(RefreshMetrics::new());
    let mut throttle = Throttle::new(config.refresh_throttle);

    let mut flush_interval = interval(config.refresh_throttle.max(MIN_FLUSH_PERIOD));
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut maintenance_interval = interval(config.cache.maintenance_interval.max(MIN_FLUSH_PERIOD));
    maintenance_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        refresh_throttle_ms = config.refresh_throttle.as_millis() as u64,
        maintenance_interval_ms = config.cache.maintenance_interval.as_millis() as u64,
        "Aggregate refresh task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Aggregate refresh task shutting down");
                    break;
                }
            }

            request = requests.recv() => {
                let Some(tenant_id) = request else {
                    info!("All refresh handles dropped, stopping");
                    break;
                };
                enqueue(&mut throttle, tenant_id, &metrics);
                while let Ok(tenant_id) = requests.try_recv() {
                    enqueue(&mut throttle, tenant_id, &metrics);
                }
                refresh_due(&engine, &mut throttle, &metrics).await;
            }

            _ = flush_interval.tick() => {
                refresh_due(&engine, &mut throttle, &metrics).await;
            }

            _ = maintenance_interval.tick() => {
                let report = engine.cache().maintain().await;
                metrics.purged.fetch_add(report.purged, Ordering::Relaxed);
            }
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        requests = snapshot.requests,
        refreshes = snapshot.refreshes,
        deferred = snapshot.deferred,
        degraded = snapshot.degraded,
        purged = snapshot.purged,
        "Aggregate refresh task completed"
    );

    metrics
}

fn enqueue(throttle: &mut Throttle, tenant_id: TenantId, metrics: &RefreshMetrics) {
    metrics.requests.fetch_add(1, Ordering::Relaxed);
    if !throttle.is_due(&tenant_id, Instant::now()) || throttle.pending.contains(&tenant_id) {
        metrics.deferred.fetch_add(1, Ordering::Relaxed);
    }
    throttle.pending.insert(tenant_id);
}

async fn refresh_due<S: ProgressStore>(
    engine: &ProgressEngine<S>,
    throttle: &mut Throttle,
    metrics: &RefreshMetrics,
) {
    for tenant_id in throttle.take_due(Instant::now()) {
        let read = engine
            .get_kpi_summary(tenant_id, RoleScope::ceo(), SummaryFilter::tenant_wide())
            .await;
        metrics.refreshes.fetch_add(1, Ordering::Relaxed);
        if read.is_degraded() {
            metrics.degraded.fetch_add(1, Ordering::Relaxed);
            warn!(%tenant_id, origin = ?read.origin(), "Refresh produced a degraded summary");
        } else {
            debug!(%tenant_id, origin = ?read.origin(), "Refreshed tenant summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratix_core::{CacheTierConfig, Initiative, ManualClock, ProgressMethod, Subtask};
    use stratix_storage::{CacheManager, InMemoryProgressStore, InProcessTier, ReadOrigin, TierKind};
    use uuid::Uuid;

    async fn engine_with_tenant() -> (Arc<ProgressEngine<InMemoryProgressStore>>, TenantId) {
        let store = Arc::new(InMemoryProgressStore::new());
        let tenant = Uuid::now_v7();
        store
            .insert_initiative(Initiative::new(tenant, Uuid::now_v7(), "Grow").with_progress(50.0))
            .await;
        let cache = Arc::new(
            CacheManager::builder(CacheTierConfig::default())
                .with_tier(Arc::new(InProcessTier::new(64)))
                .build(),
        );
        let engine = ProgressEngine::new(store, cache, &EngineConfig::default()).unwrap();
        (Arc::new(engine), tenant)
    }

    #[test]
    fn test_throttle_window() {
        let mut throttle = Throttle::new(Duration::from_secs(5));
        let tenant = Uuid::now_v7();
        let start = Instant::now();

        throttle.pending.insert(tenant);
        assert_eq!(throttle.take_due(start), vec![tenant]);

        throttle.pending.insert(tenant);
        assert!(throttle.take_due(start + Duration::from_secs(1)).is_empty());
        assert_eq!(throttle.take_due(start + Duration::from_secs(5)), vec![tenant]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_coalesced_and_throttled() {
        let (engine, tenant) = engine_with_tenant().await;
        let (handle, requests) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(aggregate_refresh_task(
            engine.clone(),
            EngineConfig::default(),
            requests,
            shutdown_rx,
        ));

        assert!(handle.request(tenant));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.cache().stats().recomputes, 1);

        for _ in 0..3 {
            handle.request(tenant);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Served once the window has passed.
        tokio::time::sleep(Duration::from_secs(11)).await;

        let _ = shutdown_tx.send(true);
        let metrics = task.await.unwrap().snapshot();
        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.refreshes, 2);
        assert_eq!(metrics.deferred, 3);
        assert_eq!(metrics.degraded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_handles_drop() {
        let (engine, _tenant) = engine_with_tenant().await;
        let (handle, requests) = refresh_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(aggregate_refresh_task(
            engine,
            EngineConfig::default(),
            requests,
            shutdown_rx,
        ));

        drop(handle);
        let metrics = task.await.unwrap().snapshot();
        assert_eq!(metrics.requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_writes_rewarm_executive_summary() {
        let store = Arc::new(InMemoryProgressStore::new());
        let tenant = Uuid::now_v7();
        let initiative = Initiative::new(tenant, Uuid::now_v7(), "Ship")
            .with_method(ProgressMethod::SubtaskBased);
        let id = initiative.initiative_id;
        store.insert_initiative(initiative).await;

        let cache = Arc::new(
            CacheManager::builder(CacheTierConfig::default())
                .with_tier(Arc::new(InProcessTier::new(64)))
                .with_clock(Arc::new(ManualClock::starting_now()))
                .build(),
        );
        let config = EngineConfig::default();
        let (handle, requests) = refresh_channel();
        let engine = Arc::new(
            ProgressEngine::new(store, cache, &config)
                .unwrap()
                .with_refresh(handle),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(aggregate_refresh_task(
            engine.clone(),
            config,
            requests,
            shutdown_rx,
        ));

        let subtask = Subtask::new(id, "build", 100.0).with_progress(40.0);
        engine.upsert_subtask(tenant, id, subtask.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let read = engine
            .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
            .await;
        assert_eq!(read.origin(), ReadOrigin::Tier(TierKind::InProcess));
        assert_eq!(read.value().average_progress, 40.0);

        // Inside the throttle window: deferred until the next flush tick.
        engine
            .upsert_subtask(tenant, id, subtask.with_progress(70.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let read = engine
            .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
            .await;
        assert_eq!(read.origin(), ReadOrigin::Tier(TierKind::InProcess));
        assert_eq!(read.value().average_progress, 70.0);
        assert_eq!(engine.cache().stats().recomputes, 2);

        let _ = shutdown_tx.send(true);
        let metrics = task.await.unwrap().snapshot();
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.refreshes, 2);
        assert_eq!(metrics.deferred, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_tick_purges_expired_entries() {
        let store = Arc::new(InMemoryProgressStore::new());
        let tenant = Uuid::now_v7();
        store
            .insert_initiative(Initiative::new(tenant, Uuid::now_v7(), "Grow"))
            .await;
        let clock = Arc::new(ManualClock::starting_now());
        let tier = Arc::new(InProcessTier::new(64));
        let mut config = EngineConfig::default();
        config.cache.maintenance_interval = Duration::from_secs(1);
        let cache = Arc::new(
            CacheManager::builder(config.cache.clone())
                .with_tier(tier.clone())
                .with_clock(clock.clone())
                .build(),
        );
        let engine = Arc::new(ProgressEngine::new(store, cache, &config).unwrap());

        engine
            .get_kpi_summary(tenant, RoleScope::ceo(), SummaryFilter::tenant_wide())
            .await;
        assert_eq!(tier.len(), 1);
        clock.advance(Duration::from_secs(31));

        let (_handle, requests) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(aggregate_refresh_task(
            engine.clone(),
            config,
            requests,
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(tier.is_empty());
        let _ = shutdown_tx.send(true);
        let metrics = task.await.unwrap().snapshot();
        assert_eq!(metrics.purged, 1);
    }
}
