//! Invalidation Router
//!
//! Maps mutation notifications to the cache key patterns they make stale.
//! Summaries are not additive, so invalidation is coarse: any change under an
//! Initiative drops every key of its Area and every tenant-wide key.

use serde::{Deserialize, Serialize};
use stratix_core::{AreaId, InitiativeId, SubtaskId, TenantId};
use stratix_storage::{CacheManager, Generation, InvalidationOutcome, KeyPattern, TierKind};

/// Where an Initiative lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitiativeRef {
    pub tenant_id: TenantId,
    pub area_id: AreaId,
    pub initiative_id: InitiativeId,
}

/// A change reported by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MutationEvent {
    SubtaskCreated {
        initiative: InitiativeRef,
        subtask_id: SubtaskId,
    },
    SubtaskUpdated {
        initiative: InitiativeRef,
        subtask_id: SubtaskId,
    },
    SubtaskDeleted {
        initiative: InitiativeRef,
        subtask_id: SubtaskId,
    },
    InitiativeCreated {
        initiative: InitiativeRef,
    },
    InitiativeUpdated {
        initiative: InitiativeRef,
    },
    InitiativeDeleted {
        initiative: InitiativeRef,
    },
    /// `initiative.area_id` is the new area.
    InitiativeReassigned {
        initiative: InitiativeRef,
        previous_area: AreaId,
    },
    /// Bulk change to a whole tenant, e.g. an import.
    TenantReset { tenant_id: TenantId },
}

impl MutationEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            MutationEvent::TenantReset { tenant_id } => *tenant_id,
            MutationEvent::SubtaskCreated { initiative, .. }
            | MutationEvent::SubtaskUpdated { initiative, .. }
            | MutationEvent::SubtaskDeleted { initiative, .. }
            | MutationEvent::InitiativeCreated { initiative }
            | MutationEvent::InitiativeUpdated { initiative }
            | MutationEvent::InitiativeDeleted { initiative }
            | MutationEvent::InitiativeReassigned { initiative, .. } => initiative.tenant_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationEvent::SubtaskCreated { .. } => "subtask_created",
            MutationEvent::SubtaskUpdated { .. } => "subtask_updated",
            MutationEvent::SubtaskDeleted { .. } => "subtask_deleted",
            MutationEvent::InitiativeCreated { .. } => "initiative_created",
            MutationEvent::InitiativeUpdated { .. } => "initiative_updated",
            MutationEvent::InitiativeDeleted { .. } => "initiative_deleted",
            MutationEvent::InitiativeReassigned { .. } => "initiative_reassigned",
            MutationEvent::TenantReset { .. } => "tenant_reset",
        }
    }
}

/// Patterns to drop for one event, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub tenant_id: TenantId,
    pub patterns: Vec<KeyPattern>,
}

impl InvalidationPlan {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            patterns: Vec::new(),
        }
    }

    fn push(&mut self, pattern: KeyPattern) {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    /// Apply every pattern to the cache, in order.
    pub async fn execute(&self, cache: &CacheManager) -> InvalidationReport {
        let mut outcomes = Vec::with_capacity(self.patterns.len());
        for pattern in &self.patterns {
            outcomes.push(cache.invalidate(pattern).await);
        }
        InvalidationReport { outcomes }
    }
}

/// What applying a plan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub outcomes: Vec<InvalidationOutcome>,
}

impl InvalidationReport {
    pub fn patterns(&self) -> Vec<KeyPattern> {
        self.outcomes.iter().map(|o| o.pattern).collect()
    }

    /// Entries dropped across all tiers.
    pub fn removed(&self) -> u64 {
        self.outcomes.iter().map(|o| o.removed).sum()
    }

    /// Tiers that missed at least one pattern.
    pub fn failed_tiers(&self) -> Vec<TierKind> {
        let mut tiers: Vec<TierKind> = self
            .outcomes
            .iter()
            .flat_map(|o| o.failed_tiers.iter().copied())
            .collect();
        tiers.sort();
        tiers.dedup();
        tiers
    }

    /// Whether every pattern advanced the journal, so no tier can serve a
    /// dropped value again.
    pub fn is_fenced(&self) -> bool {
        self.outcomes.iter().all(|o| o.generation.is_some())
    }

    /// Highest journal generation reached.
    pub fn generation(&self) -> Option<Generation> {
        self.outcomes.iter().filter_map(|o| o.generation).max()
    }
}

/// Stateless event-to-pattern mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationRouter;

impl InvalidationRouter {
    pub fn new() -> Self {
        Self
    }

    /// Patterns made stale by `event`.
    ///
    /// - any Subtask or Initiative change: the Initiative's Area and the
    ///   tenant-wide keys
    /// - reassignment: both the previous and the new Area, plus tenant-wide
    /// - tenant reset: every key of the tenant
    pub fn on_mutation(&self, event: &MutationEvent) -> InvalidationPlan {
        let tenant_id = event.tenant_id();
        let mut plan = InvalidationPlan::new(tenant_id);

        match event {
            MutationEvent::TenantReset { .. } => {
                plan.push(KeyPattern::Tenant(tenant_id));
            }
            MutationEvent::InitiativeReassigned {
                initiative,
                previous_area,
            } => {
                plan.push(KeyPattern::Area(tenant_id, *previous_area));
                plan.push(KeyPattern::Area(tenant_id, initiative.area_id));
                plan.push(KeyPattern::TenantWide(tenant_id));
            }
            MutationEvent::SubtaskCreated { initiative, .. }
            | MutationEvent::SubtaskUpdated { initiative, .. }
            | MutationEvent::SubtaskDeleted { initiative, .. }
            | MutationEvent::InitiativeCreated { initiative }
            | MutationEvent::InitiativeUpdated { initiative }
            | MutationEvent::InitiativeDeleted { initiative } => {
                plan.push(KeyPattern::Area(tenant_id, initiative.area_id));
                plan.push(KeyPattern::TenantWide(tenant_id));
            }
        }

        plan
    }
}
