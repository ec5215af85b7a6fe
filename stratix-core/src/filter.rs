//! Summary filters and role scoping
//!
//! A [`SummaryFilter`] narrows which Initiatives feed a summary. A
//! [`RoleScope`] describes who is asking; area-bound roles have their filter
//! forced onto their own area before any cache key is built, so a manager can
//! never read a tenant-wide view by omitting the area.

use crate::{AreaId, Initiative, RoleClass, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Half-open interval `[from, to)` over record timestamps.
///
/// Bounds which Initiatives were created or updated in range. It does not
/// time-travel progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeWindow {
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self { from, to }
    }

    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: Timestamp) -> bool {
        at >= self.from && at < self.to
    }
}

/// Filter applied when summarizing a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SummaryFilter {
    pub area_id: Option<AreaId>,
    pub window: Option<TimeWindow>,
}

impl SummaryFilter {
    /// Tenant-wide filter, no area and no window.
    pub fn tenant_wide() -> Self {
        Self::default()
    }

    /// Filter restricted to one area.
    pub fn for_area(area_id: AreaId) -> Self {
        Self {
            area_id: Some(area_id),
            window: None,
        }
    }

    /// Add a time window.
    pub fn within(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Whether an Initiative is selected by this filter.
    ///
    /// Deactivated Initiatives never match.
    pub fn matches(&self, initiative: &Initiative) -> bool {
        if !initiative.is_active {
            return false;
        }
        if let Some(area_id) = self.area_id {
            if initiative.area_id != area_id {
                return false;
            }
        }
        match self.window {
            Some(window) => {
                window.contains(initiative.created_at) || window.contains(initiative.updated_at)
            }
            None => true,
        }
    }

    /// Stable hash of the filter: first 16 hex chars of SHA-256 over its
    /// canonical JSON form.
    pub fn filter_hash(&self) -> String {
        // Struct field order is fixed, so serde_json output is canonical.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let mut hex = hex::encode(digest);
        hex.truncate(16);
        hex
    }
}

/// Who is asking for a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleScope {
    pub role: RoleClass,
    /// The area an area-bound role is restricted to.
    pub area_id: Option<AreaId>,
}

impl RoleScope {
    /// Executive scope: whole tenant.
    pub fn ceo() -> Self {
        Self {
            role: RoleClass::Ceo,
            area_id: None,
        }
    }

    /// Administrative scope: whole tenant.
    pub fn admin() -> Self {
        Self {
            role: RoleClass::Admin,
            area_id: None,
        }
    }

    /// Analyst scope: whole tenant, read only.
    pub fn analyst() -> Self {
        Self {
            role: RoleClass::Analyst,
            area_id: None,
        }
    }

    /// Manager scope, bound to a single area.
    pub fn manager(area_id: AreaId) -> Self {
        Self {
            role: RoleClass::Manager,
            area_id: Some(area_id),
        }
    }

    /// Narrow `filter` to what this scope may see.
    ///
    /// Area-bound roles always get their own area, whatever the filter asked
    /// for. Other roles keep the filter as given.
    pub fn constrain(&self, filter: SummaryFilter) -> SummaryFilter {
        if self.role.is_area_bound() {
            SummaryFilter {
                area_id: self.area_id,
                ..filter
            }
        } else {
            filter
        }
    }
}
