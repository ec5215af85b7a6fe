//! Enum types for Stratix records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity type discriminator for polymorphic references and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Tenant,
    Area,
    Initiative,
    Subtask,
    KpiSummary,
}

/// How an Initiative's percent-complete is derived.
///
/// A closed set: every consumer matches exhaustively, so adding a method is
/// a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMethod {
    /// Progress is set directly; subtasks are informational only.
    #[default]
    Manual,
    /// Weighted mean of active subtask progress.
    SubtaskBased,
    /// Subtask formula over configured weights once planning is complete
    /// enough, otherwise the manual value.
    Hybrid,
}

impl ProgressMethod {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ProgressMethod::Manual => "manual",
            ProgressMethod::SubtaskBased => "subtask_based",
            ProgressMethod::Hybrid => "hybrid",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(ProgressMethod::Manual),
            "subtask_based" | "subtask-based" | "subtasks" => Ok(ProgressMethod::SubtaskBased),
            "hybrid" => Ok(ProgressMethod::Hybrid),
            _ => Err(EnumParseError::new("ProgressMethod", s)),
        }
    }

    /// Whether subtask edits change the derived progress.
    pub fn tracks_subtasks(&self) -> bool {
        match self {
            ProgressMethod::Manual => false,
            ProgressMethod::SubtaskBased | ProgressMethod::Hybrid => true,
        }
    }
}

/// Lifecycle status of an Initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    #[default]
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl InitiativeStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            InitiativeStatus::Planning => "planning",
            InitiativeStatus::InProgress => "in_progress",
            InitiativeStatus::OnHold => "on_hold",
            InitiativeStatus::Completed => "completed",
            InitiativeStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(InitiativeStatus::Planning),
            "in_progress" => Ok(InitiativeStatus::InProgress),
            "on_hold" => Ok(InitiativeStatus::OnHold),
            "completed" => Ok(InitiativeStatus::Completed),
            "cancelled" => Ok(InitiativeStatus::Cancelled),
            _ => Err(EnumParseError::new("InitiativeStatus", s)),
        }
    }
}

/// Status of a Subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Completed,
}

impl SubtaskStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Blocked => "blocked",
            SubtaskStatus::Completed => "completed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SubtaskStatus::Pending),
            "in_progress" => Ok(SubtaskStatus::InProgress),
            "blocked" => Ok(SubtaskStatus::Blocked),
            "completed" => Ok(SubtaskStatus::Completed),
            _ => Err(EnumParseError::new("SubtaskStatus", s)),
        }
    }
}

/// Role class of the requester. Part of every cache key, since the same
/// tenant seen by a CEO and by an area manager yields different summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Ceo,
    Admin,
    Manager,
    Analyst,
}

impl RoleClass {
    /// Convert to the string used in cache keys and storage.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RoleClass::Ceo => "ceo",
            RoleClass::Admin => "admin",
            RoleClass::Manager => "manager",
            RoleClass::Analyst => "analyst",
        }
    }

    /// Parse from string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s.to_lowercase().as_str() {
            "ceo" => Ok(RoleClass::Ceo),
            "admin" => Ok(RoleClass::Admin),
            "manager" => Ok(RoleClass::Manager),
            "analyst" => Ok(RoleClass::Analyst),
            _ => Err(EnumParseError::new("RoleClass", s)),
        }
    }

    /// Whether this role only ever sees a single area.
    pub fn is_area_bound(&self) -> bool {
        matches!(self, RoleClass::Manager)
    }
}

macro_rules! impl_db_str_traits {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_db_str())
                }
            }

            impl FromStr for $ty {
                type Err = EnumParseError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Self::from_db_str(s)
                }
            }
        )*
    };
}

impl_db_str_traits!(ProgressMethod, InitiativeStatus, SubtaskStatus, RoleClass);

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(type_name: &'static str, value: &str) -> Self {
        Self {
            type_name,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_method_db_roundtrip() {
        for method in [
            ProgressMethod::Manual,
            ProgressMethod::SubtaskBased,
            ProgressMethod::Hybrid,
        ] {
            assert_eq!(ProgressMethod::from_db_str(method.as_db_str()), Ok(method));
        }
        assert_eq!(
            "Subtask-Based".parse::<ProgressMethod>(),
            Ok(ProgressMethod::SubtaskBased)
        );
    }

    #[test]
    fn test_progress_method_tracks_subtasks() {
        assert!(!ProgressMethod::Manual.tracks_subtasks());
        assert!(ProgressMethod::SubtaskBased.tracks_subtasks());
        assert!(ProgressMethod::Hybrid.tracks_subtasks());
    }

    #[test]
    fn test_progress_method_serde_is_snake_case() {
        let json = serde_json::to_string(&ProgressMethod::SubtaskBased).unwrap();
        assert_eq!(json, "\"subtask_based\"");
    }

    #[test]
    fn test_role_class_parse_and_display() {
        assert_eq!("CEO".parse::<RoleClass>(), Ok(RoleClass::Ceo));
        assert_eq!(RoleClass::Manager.to_string(), "manager");
        assert!(RoleClass::Manager.is_area_bound());
        assert!(!RoleClass::Ceo.is_area_bound());
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let err = "done".parse::<InitiativeStatus>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid InitiativeStatus: done");
        assert!("bogus".parse::<SubtaskStatus>().is_err());
    }
}
