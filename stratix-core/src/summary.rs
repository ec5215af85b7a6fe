//! Derived read models

use crate::{AreaId, InitiativeId, InitiativeStatus, RoleClass, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate progress over the Initiatives selected by a filter.
///
/// Derived and non-authoritative; always reconstructible from Initiatives
/// and Subtasks. Every percentage is rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub tenant_id: TenantId,
    pub area_id: Option<AreaId>,
    pub role: RoleClass,
    pub total_initiatives: u64,
    pub completed_count: u64,
    pub overdue_count: u64,
    pub average_progress: f64,
    pub strategic_count: u64,
    /// Strategic-weighted mean progress, 0 with no strategic Initiatives.
    pub strategic_weighted_progress: f64,
    pub total_budget: f64,
    pub total_spent: f64,
    /// `(budget - spent) / budget * 100`, 100 when no budget is set.
    pub budget_efficiency: f64,
    /// Number of distinct areas contributing.
    pub area_count: u64,
    pub computed_at: Timestamp,
}

impl KpiSummary {
    /// A summary over nothing.
    pub fn empty(
        tenant_id: TenantId,
        area_id: Option<AreaId>,
        role: RoleClass,
        computed_at: Timestamp,
    ) -> Self {
        Self {
            tenant_id,
            area_id,
            role,
            total_initiatives: 0,
            completed_count: 0,
            overdue_count: 0,
            average_progress: 0.0,
            strategic_count: 0,
            strategic_weighted_progress: 0.0,
            total_budget: 0.0,
            total_spent: 0.0,
            budget_efficiency: 100.0,
            area_count: 0,
            computed_at,
        }
    }

    /// Share of Initiatives that are complete, as a percentage.
    pub fn completion_rate(&self) -> f64 {
        if self.total_initiatives == 0 {
            0.0
        } else {
            crate::round2(self.completed_count as f64 / self.total_initiatives as f64 * 100.0)
        }
    }
}

/// Where an Initiative's percent came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    /// Stored manual value.
    Manual,
    /// Weighted subtask formula.
    Subtasks,
    /// Hybrid method under threshold, fell back to the manual value.
    HybridFallback,
}

impl fmt::Display for ProgressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressSource::Manual => "manual",
            ProgressSource::Subtasks => "subtasks",
            ProgressSource::HybridFallback => "hybrid_fallback",
        };
        f.write_str(s)
    }
}

/// Per-Initiative progress as presented to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiativeProgress {
    pub initiative_id: InitiativeId,
    pub area_id: AreaId,
    pub title: String,
    pub status: InitiativeStatus,
    pub percent: f64,
    pub is_overdue: bool,
    pub source: ProgressSource,
    pub active_subtasks: usize,
    pub total_weight: f64,
}
