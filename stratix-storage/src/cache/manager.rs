//! Tiered read-through, write-invalidate cache manager.
//!
//! Tiers are tried fastest first. A live hit is promoted into every faster
//! tier; a full miss recomputes through a [`StorageFetcher`] and populates
//! every tier. Tier failures and timeouts are logged and treated as misses,
//! so a cache outage only ever costs latency.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use stratix_core::{
    CacheError, CacheTierConfig, Clock, KpiSummary, StratixResult, SystemClock, TenantId,
    Timestamp,
};
use tracing::{debug, warn};

use super::journal::{Generation, InMemoryInvalidationJournal, InvalidationJournal};
use super::key::{KeyPattern, KpiCacheKey};
use super::read::CacheRead;
use super::tier::{CacheTier, TierEntry, TierKind};

/// Values the manager can hold.
///
/// The tenant is checked against the key on every read, so a value filed
/// under the wrong tenant is never served.
pub trait CacheableSummary: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn tenant_id(&self) -> TenantId;
}

impl CacheableSummary for KpiSummary {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Recompute fallback for a full cache miss.
#[async_trait]
pub trait StorageFetcher<T>: Send + Sync {
    async fn fetch(&self, key: &KpiCacheKey) -> StratixResult<T>;
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

struct TierSlot {
    tier: Arc<dyn CacheTier>,
    ttl: Duration,
    counters: TierCounters,
}

/// Counters for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStats {
    pub kind: TierKind,
    pub hits: u64,
    pub misses: u64,
    /// Failures, timeouts and undecodable entries.
    pub errors: u64,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tiers: Vec<TierStats>,
    /// Reads that scanned the tiers.
    pub lookups: u64,
    /// Full misses that called the fetcher.
    pub recomputes: u64,
    /// Reads answered with a stale entry after a failed recompute.
    pub stale_served: u64,
    /// Recomputes not written back because the key was invalidated meanwhile.
    pub skipped_populates: u64,
}

impl CacheStats {
    /// Live hits across all tiers.
    pub fn hits(&self) -> u64 {
        self.tiers.iter().map(|t| t.hits).sum()
    }

    /// Calculate the hit rate (0.0 to 1.0) over lookups.
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / self.lookups as f64
        }
    }

    pub fn tier(&self, kind: TierKind) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.kind == kind)
    }
}

/// What an invalidation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub pattern: KeyPattern,
    /// New journal generation, `None` if the journal could not be advanced.
    pub generation: Option<Generation>,
    /// Entries dropped across reachable tiers.
    pub removed: u64,
    /// Tiers that could not be reached. Their entries are fenced off by the
    /// journal generation instead.
    pub failed_tiers: Vec<TierKind>,
}

/// What a maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired entries dropped across reachable tiers.
    pub purged: u64,
    pub failed_tiers: Vec<TierKind>,
}

struct StaleCandidate<T> {
    value: T,
    cached_at: Timestamp,
    tier: TierKind,
}

struct Scan<T> {
    hit: Option<CacheRead<T>>,
    fallback: Option<StaleCandidate<T>>,
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    config: CacheTierConfig,
    tiers: Vec<Arc<dyn CacheTier>>,
    journal: Option<Arc<dyn InvalidationJournal>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CacheManagerBuilder {
    /// Add a tier. Tiers are ordered by [`TierKind`], not insertion order.
    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Share an invalidation journal with other managers.
    pub fn with_journal(mut self, journal: Arc<dyn InvalidationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> CacheManager {
        let config = self.config;
        let mut tiers: Vec<TierSlot> = self
            .tiers
            .into_iter()
            .map(|tier| {
                let ttl = match tier.kind() {
                    TierKind::InProcess => config.in_process_ttl,
                    TierKind::Distributed => config.distributed_ttl,
                    TierKind::Persistent => config.persistent_ttl,
                };
                TierSlot {
                    tier,
                    ttl,
                    counters: TierCounters::default(),
                }
            })
            .collect();
        tiers.sort_by_key(|slot| slot.tier.kind());

        CacheManager {
            tiers,
            journal: self
                .journal
                .unwrap_or_else(|| Arc::new(InMemoryInvalidationJournal::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            tier_timeout: config.tier_timeout,
            maintenance_interval: config.maintenance_interval,
            lookups: AtomicU64::new(0),
            recomputes: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            skipped_populates: AtomicU64::new(0),
        }
    }
}

/// Owner of every cache tier.
///
/// Constructed once per process and shared by reference; no other component
/// touches tier state.
pub struct CacheManager {
    tiers: Vec<TierSlot>,
    journal: Arc<dyn InvalidationJournal>,
    clock: Arc<dyn Clock>,
    tier_timeout: Duration,
    maintenance_interval: Duration,
    lookups: AtomicU64,
    recomputes: AtomicU64,
    stale_served: AtomicU64,
    skipped_populates: AtomicU64,
}

impl CacheManager {
    pub fn builder(config: CacheTierConfig) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            tiers: Vec::new(),
            journal: None,
            clock: None,
        }
    }

    /// Tier kinds in lookup order.
    pub fn tier_kinds(&self) -> Vec<TierKind> {
        self.tiers.iter().map(|slot| slot.tier.kind()).collect()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Look up a live value without recomputing.
    pub async fn get<T: CacheableSummary>(&self, key: &KpiCacheKey) -> Option<CacheRead<T>> {
        let generation = self.current_generation(key).await;
        self.scan(key, generation).await.hit
    }

    /// Store `value` in every tier with the same `ttl`.
    ///
    /// Tier failures are logged, not returned.
    pub async fn set<T: CacheableSummary>(
        &self,
        key: &KpiCacheKey,
        value: &T,
        ttl: Duration,
    ) -> StratixResult<()> {
        let payload = encode_payload(value)?;
        let Some(generation) = self.current_generation(key).await else {
            return Ok(());
        };
        let now = self.clock.now();
        for slot in &self.tiers {
            let entry = TierEntry {
                payload: payload.clone(),
                cached_at: now,
                expires_at: expiry(now, ttl),
                generation,
            };
            self.store(slot, key, entry).await;
        }
        Ok(())
    }

    /// Drop every entry matching `pattern`.
    ///
    /// The journal is advanced first, so entries in tiers that cannot be
    /// reached right now are still never served again.
    pub async fn invalidate(&self, pattern: &KeyPattern) -> InvalidationOutcome {
        let generation = match tokio::time::timeout(self.tier_timeout, self.journal.advance(pattern))
            .await
        {
            Ok(Ok(generation)) => Some(generation),
            Ok(Err(e)) => {
                warn!(%pattern, error = %e, "Invalidation journal advance failed");
                None
            }
            Err(_) => {
                warn!(%pattern, "Invalidation journal advance timed out");
                None
            }
        };

        let mut removed = 0u64;
        let mut failed_tiers = Vec::new();
        for slot in &self.tiers {
            let kind = slot.tier.kind();
            match self.bounded(kind, slot.tier.invalidate(pattern)).await {
                Ok(count) => removed += count,
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(tier = %kind, %pattern, error = %e, "Cache tier unavailable during invalidation");
                    failed_tiers.push(kind);
                }
            }
        }

        debug!(%pattern, removed, ?generation, "Invalidated cache keys");
        InvalidationOutcome {
            pattern: *pattern,
            generation,
            removed,
            failed_tiers,
        }
    }

    /// Read through the tiers, recomputing on a full miss.
    ///
    /// Errors only when the recompute fails and no stale entry exists.
    pub async fn get_or_compute<T, F>(
        &self,
        key: &KpiCacheKey,
        fetcher: &F,
    ) -> StratixResult<CacheRead<T>>
    where
        T: CacheableSummary,
        F: StorageFetcher<T> + ?Sized,
    {
        let generation = self.current_generation(key).await;
        let scan = self.scan::<T>(key, generation).await;
        if let Some(hit) = scan.hit {
            return Ok(hit);
        }

        self.recomputes.fetch_add(1, Ordering::Relaxed);
        match fetcher.fetch(key).await {
            Ok(value) => {
                let now = self.clock.now();
                match generation {
                    Some(started) if self.current_generation(key).await == Some(started) => {
                        self.populate(key, &value, started, now).await;
                    }
                    _ => {
                        self.skipped_populates.fetch_add(1, Ordering::Relaxed);
                        debug!(%key, "Key invalidated during recompute, result not cached");
                    }
                }
                Ok(CacheRead::computed(value, now))
            }
            Err(e) => {
                warn!(%key, error = %e, "Recompute failed");
                match scan.fallback {
                    Some(stale) => {
                        self.stale_served.fetch_add(1, Ordering::Relaxed);
                        Ok(CacheRead::stale(stale.value, stale.cached_at, stale.tier))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Drop expired entries from every tier.
    ///
    /// A purge scans a whole tier, so each call is bounded by the
    /// maintenance interval rather than the per-read `tier_timeout`.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let mut report = MaintenanceReport::default();
        for slot in &self.tiers {
            let kind = slot.tier.kind();
            match tokio::time::timeout(self.maintenance_interval, slot.tier.purge_expired(now)).await {
                Ok(Ok(purged)) => report.purged += purged,
                Ok(Err(e)) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(tier = %kind, error = %e, "Cache tier unavailable during maintenance");
                    report.failed_tiers.push(kind);
                }
                Err(_) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(tier = %kind, "Cache tier maintenance timed out");
                    report.failed_tiers.push(kind);
                }
            }
        }
        debug!(purged = report.purged, failed = report.failed_tiers.len(), "Cache maintenance pass");
        report
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tiers: self
                .tiers
                .iter()
                .map(|slot| TierStats {
                    kind: slot.tier.kind(),
                    hits: slot.counters.hits.load(Ordering::Relaxed),
                    misses: slot.counters.misses.load(Ordering::Relaxed),
                    errors: slot.counters.errors.load(Ordering::Relaxed),
                })
                .collect(),
            lookups: self.lookups.load(Ordering::Relaxed),
            recomputes: self.recomputes.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            skipped_populates: self.skipped_populates.load(Ordering::Relaxed),
        }
    }

    async fn current_generation(&self, key: &KpiCacheKey) -> Option<Generation> {
        match tokio::time::timeout(self.tier_timeout, self.journal.current_generation(key)).await {
            Ok(Ok(generation)) => Some(generation),
            Ok(Err(e)) => {
                warn!(%key, error = %e, "Invalidation journal unavailable, bypassing cache");
                None
            }
            Err(_) => {
                warn!(%key, "Invalidation journal timed out, bypassing cache");
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        tier: TierKind,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.tier_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                tier: tier.to_string(),
            }),
        }
    }

    /// Try each tier in order. Without a known generation every entry is
    /// treated as superseded.
    async fn scan<T: CacheableSummary>(
        &self,
        key: &KpiCacheKey,
        generation: Option<Generation>,
    ) -> Scan<T> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut fallback: Option<StaleCandidate<T>> = None;

        for (index, slot) in self.tiers.iter().enumerate() {
            let kind = slot.tier.kind();
            let entry = match self.bounded(kind, slot.tier.get(key)).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    slot.counters.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(tier = %kind, %key, "Cache miss");
                    continue;
                }
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(tier = %kind, %key, error = %e, "Cache tier unavailable, falling through");
                    continue;
                }
            };

            let value: T = match decode_payload(&entry.payload) {
                Ok(value) => value,
                Err(e) => {
                    slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(tier = %kind, %key, error = %e, "Undecodable cache entry");
                    continue;
                }
            };

            if value.tenant_id() != key.tenant_id() {
                slot.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tier = %kind,
                    %key,
                    found_tenant = %value.tenant_id(),
                    "Cached value belongs to another tenant, ignoring"
                );
                continue;
            }

            let superseded = generation.map_or(true, |current| entry.generation < current);
            if superseded || entry.is_expired(now) {
                slot.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(tier = %kind, %key, superseded, "Cache entry no longer live");
                let fresher = fallback
                    .as_ref()
                    .map_or(true, |candidate| entry.cached_at > candidate.cached_at);
                if fresher {
                    fallback = Some(StaleCandidate {
                        value,
                        cached_at: entry.cached_at,
                        tier: kind,
                    });
                }
                continue;
            }

            slot.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(tier = %kind, %key, "Cache hit");
            self.promote(key, &entry, index, now).await;
            return Scan {
                hit: Some(CacheRead::from_tier(value, entry.cached_at, kind)),
                fallback,
            };
        }

        Scan {
            hit: None,
            fallback,
        }
    }

    /// Copy a hit from tier `found_at` into every faster tier, never
    /// extending its original expiry.
    async fn promote(&self, key: &KpiCacheKey, entry: &TierEntry, found_at: usize, now: Timestamp) {
        for slot in &self.tiers[..found_at] {
            let promoted = TierEntry {
                payload: entry.payload.clone(),
                cached_at: entry.cached_at,
                expires_at: expiry(now, slot.ttl).min(entry.expires_at),
                generation: entry.generation,
            };
            debug!(tier = %slot.tier.kind(), %key, "Promoting cache entry");
            self.store(slot, key, promoted).await;
        }
    }

    async fn populate<T: CacheableSummary>(
        &self,
        key: &KpiCacheKey,
        value: &T,
        generation: Generation,
        now: Timestamp,
    ) {
        let payload = match encode_payload(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%key, error = %e, "Could not serialize value for caching");
                return;
            }
        };
        for slot in &self.tiers {
            let entry = TierEntry {
                payload: payload.clone(),
                cached_at: now,
                expires_at: expiry(now, slot.ttl),
                generation,
            };
            self.store(slot, key, entry).await;
        }
    }

    async fn store(&self, slot: &TierSlot, key: &KpiCacheKey, entry: TierEntry) {
        let kind = slot.tier.kind();
        if let Err(e) = self.bounded(kind, slot.tier.set(key, entry)).await {
            slot.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(tier = %kind, %key, error = %e, "Cache tier write failed");
        }
    }
}

fn expiry(now: Timestamp, ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(payload).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}
