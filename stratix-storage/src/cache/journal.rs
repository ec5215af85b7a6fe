//! Invalidation journal.
//!
//! Every invalidation advances a generation counter for the scope it covers
//! before any tier is touched. Entries remember the generation that was
//! current when their computation started, and the manager treats any entry
//! older than the key's current generation as a miss. A tier that could not
//! be reached during invalidation therefore cannot serve the dropped value
//! once it comes back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratix_core::{AreaId, StratixResult, TenantId};

use super::key::{KeyPattern, KpiCacheKey};

/// A point in the invalidation history.
///
/// Generations come from one counter per journal, so they are comparable
/// across tenants and scopes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation of a key that was never invalidated.
    pub const ZERO: Generation = Generation(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Tracks invalidation generations for cache keys.
#[async_trait]
pub trait InvalidationJournal: Send + Sync {
    /// The generation a fresh entry for `key` must carry to be served.
    async fn current_generation(&self, key: &KpiCacheKey) -> StratixResult<Generation>;

    /// Record an invalidation of `pattern`, returning the new generation.
    async fn advance(&self, pattern: &KeyPattern) -> StratixResult<Generation>;
}

/// Per-tenant generation marks.
#[derive(Debug, Default)]
struct TenantGenerations {
    /// Last `KeyPattern::Tenant` invalidation.
    tenant: Generation,
    /// Last `KeyPattern::TenantWide` invalidation.
    tenant_wide: Generation,
    /// Last `KeyPattern::Area` invalidation per area.
    areas: HashMap<AreaId, Generation>,
}

impl TenantGenerations {
    fn for_key(&self, key: &KpiCacheKey) -> Generation {
        let scoped = match key.area_id() {
            Some(area_id) => self.areas.get(&area_id).copied().unwrap_or_default(),
            None => self.tenant_wide,
        };
        self.tenant.max(scoped)
    }
}

#[derive(Debug, Default)]
struct JournalState {
    counter: u64,
    tenants: HashMap<TenantId, TenantGenerations>,
}

/// In-memory invalidation journal.
///
/// Uses tokio::sync::RwLock for safe async access. Share one instance
/// between every manager that shares a tier.
#[derive(Debug, Default)]
pub struct InMemoryInvalidationJournal {
    state: tokio::sync::RwLock<JournalState>,
}

impl InMemoryInvalidationJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvalidationJournal for InMemoryInvalidationJournal {
    async fn current_generation(&self, key: &KpiCacheKey) -> StratixResult<Generation> {
        let state = self.state.read().await;
        Ok(state
            .tenants
            .get(&key.tenant_id())
            .map(|t| t.for_key(key))
            .unwrap_or_default())
    }

    async fn advance(&self, pattern: &KeyPattern) -> StratixResult<Generation> {
        let mut state = self.state.write().await;
        state.counter += 1;
        let generation = Generation(state.counter);

        let tenant = state.tenants.entry(pattern.tenant_id()).or_default();
        match pattern {
            KeyPattern::Tenant(_) => tenant.tenant = generation,
            KeyPattern::TenantWide(_) => tenant.tenant_wide = generation,
            KeyPattern::Area(_, area_id) => {
                tenant.areas.insert(*area_id, generation);
            }
        }

        Ok(generation)
    }
}
