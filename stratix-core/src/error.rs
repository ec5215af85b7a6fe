//! Error types for Stratix operations

use crate::{EntityType, InitiativeId, SubtaskId};
use thiserror::Error;
use uuid::Uuid;

/// Storage collaborator errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Commit failed: {reason}")]
    CommitFailed { reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Write-path validation errors. User-correctable, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Weight exceeded for initiative {initiative_id}: total {total}% is over 100% by {over_by}%")]
    WeightExceeded {
        initiative_id: InitiativeId,
        total: f64,
        over_by: f64,
    },

    #[error("Invalid weight for subtask {subtask_id}: {weight} (must be > 0 and <= 100)")]
    InvalidWeight { subtask_id: SubtaskId, weight: f64 },

    #[error("Invalid progress for subtask {subtask_id}: {progress} (must be within 0..=100)")]
    InvalidProgress { subtask_id: SubtaskId, progress: f64 },

    #[error("Subtask belongs to initiative {got}, expected {expected}")]
    InitiativeMismatch {
        expected: InitiativeId,
        got: InitiativeId,
    },
}

/// Optimistic concurrency errors. Transient; the caller should retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("Concurrent subtask writes on initiative {initiative_id} after {attempts} attempts, please retry")]
    WeightConflict {
        initiative_id: InitiativeId,
        attempts: u32,
    },
}

/// Cache tier errors. Absorbed by the read path, only ever logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("Cache tier {tier} timed out")]
    Timeout { tier: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Stratix errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StratixError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StratixError {
    /// Whether the caller may resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StratixError::Concurrency(ConcurrencyError::WeightConflict { .. })
                | StratixError::Storage(StorageError::Unavailable { .. })
        )
    }

    /// Whether this is a user-correctable rejection of a write.
    pub fn is_rejection(&self) -> bool {
        matches!(self, StratixError::Validation(_))
    }
}

/// Result type alias for Stratix operations.
pub type StratixResult<T> = Result<T, StratixError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_exceeded_display() {
        let err = ValidationError::WeightExceeded {
            initiative_id: Uuid::nil(),
            total: 150.0,
            over_by: 50.0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Weight exceeded"));
        assert!(msg.contains("150"));
        assert!(msg.contains("by 50"));
    }

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Initiative,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Initiative"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_weight_conflict_display() {
        let err = ConcurrencyError::WeightConflict {
            initiative_id: Uuid::nil(),
            attempts: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("please retry"));
    }

    #[test]
    fn test_stratix_error_from_variants() {
        let storage = StratixError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, StratixError::Storage(_)));

        let validation = StratixError::from(ValidationError::InvalidWeight {
            subtask_id: Uuid::nil(),
            weight: 0.0,
        });
        assert!(matches!(validation, StratixError::Validation(_)));
        assert!(validation.is_rejection());
        assert!(!validation.is_retryable());

        let conflict = StratixError::from(ConcurrencyError::WeightConflict {
            initiative_id: Uuid::nil(),
            attempts: 1,
        });
        assert!(conflict.is_retryable());
        assert!(!conflict.is_rejection());

        let cache = StratixError::from(CacheError::Timeout {
            tier: "distributed".to_string(),
        });
        assert!(matches!(cache, StratixError::Cache(_)));

        let config = StratixError::from(ConfigError::MissingRequired {
            field: "hybrid_threshold".to_string(),
        });
        assert!(matches!(config, StratixError::Config(_)));
    }
}
