//! Multi-tier KPI summary cache.
//!
//! Three tiers sit in front of the aggregator, fastest first: an in-process
//! map, a shared store visible to every engine instance, and a persistent
//! LMDB fallback. [`CacheManager`] owns all of them and is the only component
//! that touches tier state.
//!
//! # Tenant Isolation
//!
//! [`KpiCacheKey`] cannot be built without a tenant, and the rendered form
//! puts the tenant first, so every invalidation pattern is a prefix that
//! stays inside one tenant.
//!
//! # Invalidation
//!
//! Writes invalidate instead of updating. [`CacheManager::invalidate`]
//! advances the [`InvalidationJournal`] before touching any tier, and reads
//! ignore entries older than the key's generation. A value dropped while a
//! tier was unreachable is never served again.
//!
//! # Example
//!
//! ```ignore
//! let manager = CacheManager::builder(config.cache.clone())
//!     .with_tier(Arc::new(InProcessTier::new(10_000)))
//!     .with_tier(Arc::new(shared.clone()))
//!     .with_tier(Arc::new(LmdbTier::open(dir, 64)?))
//!     .build();
//!
//! let read = manager.get_or_compute(&key, &aggregator).await?;
//! if read.is_degraded() {
//!     tracing::warn!("Serving degraded KPI summary");
//! }
//! ```

pub mod journal;
pub mod key;
pub mod lmdb_tier;
pub mod manager;
pub mod memory_tier;
pub mod read;
pub mod shared_tier;
pub mod tier;

pub use journal::{Generation, InMemoryInvalidationJournal, InvalidationJournal};
pub use key::{KeyPattern, KpiCacheKey};
pub use lmdb_tier::{LmdbTier, LmdbTierError};
pub use manager::{
    CacheManager, CacheManagerBuilder, CacheStats, CacheableSummary, InvalidationOutcome,
    MaintenanceReport, StorageFetcher, TierStats,
};
pub use memory_tier::InProcessTier;
pub use read::{CacheRead, ReadOrigin};
pub use shared_tier::SharedMemoryTier;
pub use tier::{CacheTier, TierEntry, TierKind};
