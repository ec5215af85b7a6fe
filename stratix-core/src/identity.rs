//! Identity types for Stratix records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Record identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Tenant (organization) identifier.
pub type TenantId = Uuid;

/// Area (department) identifier within a tenant.
pub type AreaId = Uuid;

/// Initiative identifier.
pub type InitiativeId = Uuid;

/// Subtask identifier.
pub type SubtaskId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Row revision of an Initiative and its subtask set.
///
/// Every committed subtask write bumps the owning Initiative's revision.
/// Writers carry the revision they validated against; storage accepts the
/// write only if the revision is unchanged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// The revision of a freshly created Initiative.
    pub const INITIAL: Revision = Revision(0);

    /// The revision that follows this one.
    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    /// Raw revision number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
