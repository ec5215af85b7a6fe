//! Shared tier.
//!
//! A string-keyed byte store shared by every manager holding a clone, with
//! the same shape as a remote key-value service: rendered keys, encoded
//! values, prefix scans for invalidation. Reachability can be toggled to
//! exercise partition handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use stratix_core::{CacheError, Timestamp};

use super::key::{KeyPattern, KpiCacheKey};
use super::tier::{CacheTier, TierEntry, TierKind};

#[derive(Debug, Default)]
struct SharedInner {
    entries: DashMap<String, Vec<u8>>,
    unreachable: AtomicBool,
}

/// Distributed-tier implementation backed by shared memory.
///
/// Cloning yields another handle onto the same store.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryTier {
    inner: Arc<SharedInner>,
}

impl SharedMemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining the connection to the store.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        !self.inner.unreachable.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn check_reachable(&self) -> Result<(), CacheError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(CacheError::TierUnavailable {
                tier: TierKind::Distributed.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

#[async_trait]
impl CacheTier for SharedMemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Distributed
    }

    async fn get(&self, key: &KpiCacheKey) -> Result<Option<TierEntry>, CacheError> {
        self.check_reachable()?;
        match self.inner.entries.get(&key.render()) {
            Some(bytes) => Ok(Some(TierEntry::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &KpiCacheKey, entry: TierEntry) -> Result<(), CacheError> {
        self.check_reachable()?;
        self.inner.entries.insert(key.render(), entry.encode());
        Ok(())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        self.check_reachable()?;
        let prefix = pattern.prefix();
        let before = self.inner.entries.len();
        self.inner.entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(before.saturating_sub(self.inner.entries.len()) as u64)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, CacheError> {
        self.check_reachable()?;
        let before = self.inner.entries.len();
        // Undecodable values can never be served, so they go too.
        self.inner
            .entries
            .retain(|_, bytes| matches!(TierEntry::decode(bytes), Ok(entry) if !entry.is_expired(now)));
        Ok(before.saturating_sub(self.inner.entries.len()) as u64)
    }
}
