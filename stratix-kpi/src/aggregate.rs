//! KPI Aggregator
//!
//! Rolls per-Initiative progress up into a [`KpiSummary`]. All expense is in
//! the storage fetch; [`reduce`] itself is pure and is what the cache saves
//! us from repeating.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use stratix_core::{
    round2, AreaId, Clock, Initiative, InitiativeProgress, KpiSummary, RoleClass, StratixResult,
    SummaryFilter, TenantId, Timestamp,
};
use stratix_storage::{KpiCacheKey, ProgressStore, StorageFetcher};

use crate::progress::{ProgressBreakdown, ProgressCalculator};

/// An Initiative paired with its computed progress.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedInitiative {
    pub initiative: Initiative,
    pub breakdown: ProgressBreakdown,
}

impl EvaluatedInitiative {
    pub fn percent(&self) -> f64 {
        self.breakdown.percent
    }

    /// Read model for presentation.
    pub fn to_progress(&self, now: Timestamp) -> InitiativeProgress {
        let initiative = &self.initiative;
        InitiativeProgress {
            initiative_id: initiative.initiative_id,
            area_id: initiative.area_id,
            title: initiative.title.clone(),
            status: initiative.status,
            percent: self.breakdown.percent,
            is_overdue: initiative.is_overdue(self.breakdown.percent, now),
            source: self.breakdown.source,
            active_subtasks: self.breakdown.active_subtasks,
            total_weight: self.breakdown.total_weight,
        }
    }
}

/// Reduce evaluated Initiatives into a summary.
///
/// - completed: percent >= 100
/// - overdue: due before `now` and percent < 100
/// - strategic-weighted progress: mean of percent weighted by
///   `weight_factor` over strategic Initiatives, 0 when there are none
/// - budget efficiency: `(budget - spent) / budget * 100`, 100 without budget
pub fn reduce(
    tenant_id: TenantId,
    area_id: Option<AreaId>,
    role: RoleClass,
    evaluated: &[EvaluatedInitiative],
    now: Timestamp,
) -> KpiSummary {
    let mut summary = KpiSummary::empty(tenant_id, area_id, role, now);
    if evaluated.is_empty() {
        return summary;
    }

    let mut progress_sum = 0.0;
    let mut strategic_sum = 0.0;
    let mut strategic_weight = 0.0;
    let mut areas = HashSet::new();

    for item in evaluated {
        let initiative = &item.initiative;
        let percent = item.percent();

        summary.total_initiatives += 1;
        progress_sum += percent;
        if percent >= 100.0 {
            summary.completed_count += 1;
        }
        if initiative.is_overdue(percent, now) {
            summary.overdue_count += 1;
        }

        let weight = initiative.strategic_weight();
        if weight > 0.0 {
            summary.strategic_count += 1;
            strategic_sum += percent * weight;
            strategic_weight += weight;
        }

        summary.total_budget += initiative.budget.filter(|b| b.is_finite()).unwrap_or(0.0);
        summary.total_spent += initiative
            .actual_cost
            .filter(|c| c.is_finite())
            .unwrap_or(0.0);
        areas.insert(initiative.area_id);
    }

    summary.average_progress = round2(progress_sum / summary.total_initiatives as f64);
    summary.strategic_weighted_progress = if strategic_weight > 0.0 {
        round2(strategic_sum / strategic_weight)
    } else {
        0.0
    };
    summary.budget_efficiency = if summary.total_budget > 0.0 {
        round2((summary.total_budget - summary.total_spent) / summary.total_budget * 100.0)
    } else {
        100.0
    };
    summary.area_count = areas.len() as u64;
    summary
}

/// Computes summaries from the storage collaborator.
pub struct KpiAggregator<S> {
    store: Arc<S>,
    calculator: ProgressCalculator,
    clock: Arc<dyn Clock>,
}

impl<S: ProgressStore> KpiAggregator<S> {
    pub fn new(store: Arc<S>, calculator: ProgressCalculator, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            calculator,
            clock,
        }
    }

    pub fn calculator(&self) -> &ProgressCalculator {
        &self.calculator
    }

    /// Compute one Initiative's progress from its current Subtasks.
    pub async fn evaluate(&self, initiative: Initiative) -> StratixResult<EvaluatedInitiative> {
        let subtasks = self.store.fetch_subtasks(initiative.initiative_id).await?;
        let breakdown = self.calculator.compute(&initiative, &subtasks);
        Ok(EvaluatedInitiative {
            initiative,
            breakdown,
        })
    }

    /// Summarize the active Initiatives of `tenant_id` selected by `filter`.
    ///
    /// Role narrowing is the caller's job; `role` is only recorded.
    pub async fn summarize(
        &self,
        tenant_id: TenantId,
        role: RoleClass,
        filter: &SummaryFilter,
    ) -> StratixResult<KpiSummary> {
        let initiatives = self.store.fetch_initiatives(tenant_id, filter).await?;
        let mut evaluated = Vec::with_capacity(initiatives.len());
        for initiative in initiatives {
            evaluated.push(self.evaluate(initiative).await?);
        }
        Ok(reduce(
            tenant_id,
            filter.area_id,
            role,
            &evaluated,
            self.clock.now(),
        ))
    }

    /// Bind a filter so the aggregator can serve as the cache's recompute path.
    pub fn fetcher_for(&self, filter: SummaryFilter) -> SummaryFetch<'_, S> {
        SummaryFetch {
            aggregator: self,
            filter,
        }
    }
}

/// Recompute path for one cache key.
///
/// Cache keys only carry a hash of the filter, so the filter travels here.
pub struct SummaryFetch<'a, S> {
    aggregator: &'a KpiAggregator<S>,
    filter: SummaryFilter,
}

#[async_trait]
impl<'a, S: ProgressStore> StorageFetcher<KpiSummary> for SummaryFetch<'a, S> {
    async fn fetch(&self, key: &KpiCacheKey) -> StratixResult<KpiSummary> {
        self.aggregator
            .summarize(key.tenant_id(), key.role(), &self.filter)
            .await
    }
}
