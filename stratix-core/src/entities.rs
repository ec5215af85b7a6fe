//! Core record structures

use crate::{
    AreaId, InitiativeId, InitiativeStatus, ProgressMethod, Revision, SubtaskId, SubtaskStatus,
    TenantId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Initiative - a top-level tracked goal with its own progress.
///
/// Never deleted physically; deactivation sets `is_active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    pub initiative_id: InitiativeId,
    pub tenant_id: TenantId,
    pub area_id: AreaId,
    pub title: String,
    /// Stored progress in [0, 100]. Authoritative for `Manual`, derived
    /// write-back otherwise.
    pub progress: f64,
    pub progress_method: ProgressMethod,
    /// Positive weight, only consulted when `is_strategic`.
    pub weight_factor: f64,
    pub is_strategic: bool,
    pub status: InitiativeStatus,
    pub due_date: Option<Timestamp>,
    pub budget: Option<f64>,
    pub actual_cost: Option<f64>,
    pub is_active: bool,
    pub revision: Revision,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Initiative {
    /// Create a new manual-progress Initiative at revision 0.
    pub fn new(tenant_id: TenantId, area_id: AreaId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            initiative_id: Uuid::now_v7(),
            tenant_id,
            area_id,
            title: title.into(),
            progress: 0.0,
            progress_method: ProgressMethod::Manual,
            weight_factor: 1.0,
            is_strategic: false,
            status: InitiativeStatus::Planning,
            due_date: None,
            budget: None,
            actual_cost: None,
            is_active: true,
            revision: Revision::INITIAL,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the progress computation method.
    pub fn with_method(mut self, method: ProgressMethod) -> Self {
        self.progress_method = method;
        self
    }

    /// Set the stored (manual) progress.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    /// Mark as strategic with the given weight factor.
    pub fn strategic(mut self, weight_factor: f64) -> Self {
        self.is_strategic = true;
        self.weight_factor = weight_factor;
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: InitiativeStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the due date.
    pub fn with_due_date(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Set budget and spend.
    pub fn with_budget(mut self, budget: f64, actual_cost: f64) -> Self {
        self.budget = Some(budget);
        self.actual_cost = Some(actual_cost);
        self
    }

    /// Override creation and update timestamps.
    pub fn with_timestamps(mut self, created_at: Timestamp, updated_at: Timestamp) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Whether the Initiative is past due without being complete.
    pub fn is_overdue(&self, percent: f64, now: Timestamp) -> bool {
        match self.due_date {
            Some(due) => due < now && percent < 100.0,
            None => false,
        }
    }

    /// Strategic weight, zero for non-strategic or non-positive factors.
    pub fn strategic_weight(&self) -> f64 {
        if self.is_strategic && self.weight_factor.is_finite() && self.weight_factor > 0.0 {
            self.weight_factor
        } else {
            0.0
        }
    }
}

/// Subtask - a weighted sub-unit of an Initiative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub subtask_id: SubtaskId,
    pub initiative_id: InitiativeId,
    pub title: String,
    /// Share of the Initiative's progress, 0 < w <= 100.
    pub weight_percentage: f64,
    /// Completion in [0, 100].
    pub progress: f64,
    pub status: SubtaskStatus,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subtask {
    /// Create a new active Subtask with zero progress.
    pub fn new(initiative_id: InitiativeId, title: impl Into<String>, weight_percentage: f64) -> Self {
        let now = Utc::now();
        Self {
            subtask_id: Uuid::now_v7(),
            initiative_id,
            title: title.into(),
            weight_percentage,
            progress: 0.0,
            status: SubtaskStatus::Pending,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set progress, deriving a matching status.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self.status = if progress >= 100.0 {
            SubtaskStatus::Completed
        } else if progress > 0.0 {
            SubtaskStatus::InProgress
        } else {
            SubtaskStatus::Pending
        };
        self
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight_percentage: f64) -> Self {
        self.weight_percentage = weight_percentage;
        self
    }

    /// Set the status explicitly.
    pub fn with_status(mut self, status: SubtaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as deactivated.
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}
