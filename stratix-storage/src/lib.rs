//! Stratix Storage - Storage Contract and KPI Cache
//!
//! Defines the storage collaborator the engine reads from and commits
//! through, an in-memory implementation of it, and the tiered summary cache.

pub mod cache;
pub mod memory;
pub mod storage;

pub use memory::InMemoryProgressStore;
pub use storage::{CommitOutcome, ProgressStore, SubtaskWrite};

// Re-export cache types for the engine
pub use cache::{
    CacheManager, CacheManagerBuilder, CacheRead, CacheStats, CacheTier, CacheableSummary,
    Generation, InMemoryInvalidationJournal, InProcessTier, InvalidationJournal,
    InvalidationOutcome, KeyPattern, KpiCacheKey, LmdbTier, LmdbTierError, MaintenanceReport,
    ReadOrigin,
    SharedMemoryTier, StorageFetcher, TierEntry, TierKind, TierStats,
};
