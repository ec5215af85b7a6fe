//! Weight Validator
//!
//! Enforces that the active Subtasks of one Initiative never carry more than
//! 100% combined weight. Pure and synchronous: the engine feeds it the
//! sibling set read at a known revision and commits only if that revision
//! still holds.

use stratix_core::{round2, EngineConfig, InitiativeId, Subtask, ValidationError};
use stratix_storage::SubtaskWrite;

/// Upper bound for the active weight sum of one Initiative.
pub const MAX_TOTAL_WEIGHT: f64 = 100.0;

/// Weight sum an accepted write leaves behind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightCheck {
    /// Active weight after the write.
    pub total: f64,
    /// Weight still available for new Subtasks.
    pub remaining: f64,
}

/// Validates subtask writes against the weight budget of their Initiative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightValidator {
    epsilon: f64,
}

impl Default for WeightValidator {
    fn default() -> Self {
        Self::new(EngineConfig::default().weight_epsilon)
    }
}

impl WeightValidator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.weight_epsilon)
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Validate `write` against the current `siblings` of `initiative_id`.
    ///
    /// `siblings` is the full committed set, inactive Subtasks included; only
    /// active ones count. An upsert replaces the sibling with the same id.
    /// Deactivation always passes since it can only lower the sum.
    pub fn validate(
        &self,
        initiative_id: InitiativeId,
        siblings: &[Subtask],
        write: &SubtaskWrite,
    ) -> Result<WeightCheck, ValidationError> {
        let candidate = match write {
            SubtaskWrite::Upsert(subtask) => {
                check_shape(initiative_id, subtask)?;
                Some(subtask)
            }
            SubtaskWrite::Deactivate(_) => None,
        };

        let replaced = write.subtask_id();
        let others: f64 = siblings
            .iter()
            .filter(|s| s.is_active && s.subtask_id != replaced)
            .map(|s| s.weight_percentage)
            .sum();
        let total = others
            + candidate
                .filter(|s| s.is_active)
                .map_or(0.0, |s| s.weight_percentage);

        if total > MAX_TOTAL_WEIGHT + self.epsilon {
            return Err(ValidationError::WeightExceeded {
                initiative_id,
                total: round2(total),
                over_by: round2(total - MAX_TOTAL_WEIGHT),
            });
        }

        Ok(WeightCheck {
            total: round2(total),
            remaining: round2((MAX_TOTAL_WEIGHT - total).max(0.0)),
        })
    }
}

/// Sum of active weights in `subtasks`.
pub fn total_active_weight(subtasks: &[Subtask]) -> f64 {
    subtasks
        .iter()
        .filter(|s| s.is_active)
        .map(|s| s.weight_percentage)
        .sum()
}

fn check_shape(initiative_id: InitiativeId, subtask: &Subtask) -> Result<(), ValidationError> {
    if subtask.initiative_id != initiative_id {
        return Err(ValidationError::InitiativeMismatch {
            expected: initiative_id,
            got: subtask.initiative_id,
        });
    }

    let weight = subtask.weight_percentage;
    if !(weight.is_finite() && weight > 0.0 && weight <= MAX_TOTAL_WEIGHT) {
        return Err(ValidationError::InvalidWeight {
            subtask_id: subtask.subtask_id,
            weight,
        });
    }

    let progress = subtask.progress;
    if !(0.0..=100.0).contains(&progress) {
        return Err(ValidationError::InvalidProgress {
            subtask_id: subtask.subtask_id,
            progress,
        });
    }

    Ok(())
}
