//! In-process tier: a bounded concurrent map.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use stratix_core::{CacheError, Timestamp};

use super::key::{KeyPattern, KpiCacheKey};
use super::tier::{CacheTier, TierEntry, TierKind};

const EVICTION_BATCH_DIVISOR: usize = 16;

/// Fastest tier, local to one process.
///
/// Holds at most `capacity` entries. Inserting a new key into a full tier
/// evicts the earliest-expiring sixteenth of the entries in one pass.
#[derive(Debug)]
pub struct InProcessTier {
    entries: DashMap<KpiCacheKey, TierEntry>,
    capacity: usize,
    evictions: AtomicU64,
}

impl InProcessTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted for capacity so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn batch_size(&self) -> usize {
        (self.capacity / EVICTION_BATCH_DIVISOR).max(1)
    }

    fn evict_batch(&self) {
        let mut candidates: Vec<(Timestamp, KpiCacheKey)> = self
            .entries
            .iter()
            .map(|e| (e.value().expires_at, e.key().clone()))
            .collect();
        let batch = self.batch_size().min(candidates.len());
        if batch == 0 {
            return;
        }
        if batch < candidates.len() {
            candidates.select_nth_unstable_by_key(batch - 1, |(expires_at, _)| *expires_at);
        }

        let mut evicted = 0u64;
        for (_, key) in candidates.into_iter().take(batch) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheTier for InProcessTier {
    fn kind(&self) -> TierKind {
        TierKind::InProcess
    }

    async fn get(&self, key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &KpiCacheKey, entry: TierEntry) -> Result<(), CacheError> {
        if !self.entries.contains_key(key) {
            while self.entries.len() >= self.capacity {
                self.evict_batch();
            }
        }
        self.entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::journal::Generation;
    use chrono::{Duration, Utc};
    use stratix_core::{RoleClass, SummaryFilter};
    use uuid::Uuid;

    fn entry_expiring_in(secs: i64) -> TierEntry {
        let now = Utc::now();
        TierEntry {
            payload: b"{}".to_vec(),
            cached_at: now,
            expires_at: now + Duration::seconds(secs),
            generation: Generation::ZERO,
        }
    }

    fn area_key(tenant: Uuid) -> KpiCacheKey {
        KpiCacheKey::new(
            tenant,
            RoleClass::Manager,
            &SummaryFilter::for_area(Uuid::now_v7()),
        )
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let tier = InProcessTier::new(10);
        let key = area_key(Uuid::now_v7());
        let entry = entry_expiring_in(30);
        tier.set(&key, entry.clone()).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_capacity_evicts_earliest_expiry() {
        let tier = InProcessTier::new(2);
        let tenant = Uuid::now_v7();
        let soon = area_key(tenant);
        let later = area_key(tenant);
        let newest = area_key(tenant);

        tier.set(&soon, entry_expiring_in(5)).await.unwrap();
        tier.set(&later, entry_expiring_in(60)).await.unwrap();
        tier.set(&newest, entry_expiring_in(30)).await.unwrap();

        assert_eq!(tier.len(), 2);
        assert_eq!(tier.evictions(), 1);
        assert!(tier.get(&soon).await.unwrap().is_none());
        assert!(tier.get(&later).await.unwrap().is_some());
        assert!(tier.get(&newest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replacing_existing_key_does_not_evict() {
        let tier = InProcessTier::new(1);
        let key = area_key(Uuid::now_v7());
        tier.set(&key, entry_expiring_in(5)).await.unwrap();
        tier.set(&key, entry_expiring_in(10)).await.unwrap();
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.evictions(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let tier = InProcessTier::new(10);
        let tenant = Uuid::now_v7();
        let other_tenant = Uuid::now_v7();

        let wide = KpiCacheKey::new(tenant, RoleClass::Ceo, &SummaryFilter::tenant_wide());
        let scoped = area_key(tenant);
        let foreign = area_key(other_tenant);

        for key in [&wide, &scoped, &foreign] {
            tier.set(key, entry_expiring_in(30)).await.unwrap();
        }

        let dropped = tier
            .invalidate(&KeyPattern::TenantWide(tenant))
            .await
            .unwrap();
        assert_eq!(dropped, 1);

        let dropped = tier.invalidate(&KeyPattern::Tenant(tenant)).await.unwrap();
        assert_eq!(dropped, 1);

        assert!(tier.get(&foreign).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_full_tier_evicts_a_batch_of_earliest_expiries() {
        let tier = InProcessTier::new(32);
        let tenant = Uuid::now_v7();
        let mut keys = Vec::new();
        for secs in 0..32 {
            let key = area_key(tenant);
            tier.set(&key, entry_expiring_in(100 + secs)).await.unwrap();
            keys.push(key);
        }
        assert_eq!(tier.evictions(), 0);

        tier.set(&area_key(tenant), entry_expiring_in(500)).await.unwrap();

        // 32 / 16 entries leave in one pass, the two expiring first.
        assert_eq!(tier.evictions(), 2);
        assert_eq!(tier.len(), 31);
        assert!(tier.get(&keys[0]).await.unwrap().is_none());
        assert!(tier.get(&keys[1]).await.unwrap().is_none());
        assert!(tier.get(&keys[2]).await.unwrap().is_some());

        // Room left by the batch absorbs the next insert without a scan.
        tier.set(&area_key(tenant), entry_expiring_in(500)).await.unwrap();
        assert_eq!(tier.evictions(), 2);
        assert_eq!(tier.len(), 32);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_only_expired() {
        let tier = InProcessTier::new(10);
        let tenant = Uuid::now_v7();
        let live = area_key(tenant);
        let dead = area_key(tenant);
        tier.set(&live, entry_expiring_in(60)).await.unwrap();
        tier.set(&dead, entry_expiring_in(-1)).await.unwrap();

        assert_eq!(tier.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(tier.get(&live).await.unwrap().is_some());
        assert!(tier.get(&dead).await.unwrap().is_none());
        assert_eq!(tier.evictions(), 0);
    }
}
