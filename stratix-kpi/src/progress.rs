//! Progress Calculator
//!
//! Computes one Initiative's percent complete from its Subtasks according to
//! its [`ProgressMethod`]. Total over any input: out-of-range values are
//! clamped and reported as [`AggregationAnomaly`] instead of failing the read.

use std::fmt;

use serde::{Deserialize, Serialize};
use stratix_core::{
    clamp_percent, round2, EngineConfig, Initiative, InitiativeId, ProgressMethod, ProgressSource,
    Subtask, SubtaskId,
};
use tracing::warn;

use crate::weights::MAX_TOTAL_WEIGHT;

/// A defensive finding made while computing progress.
///
/// Logged and returned for inspection, never raised as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationAnomaly {
    /// Active weights sum above 100 despite write-time validation.
    WeightOverflow {
        initiative_id: InitiativeId,
        total: f64,
    },
    /// A weight outside (0, 100], clamped before use.
    WeightOutOfRange { subtask_id: SubtaskId, weight: f64 },
    /// A subtask progress outside [0, 100], clamped before use.
    ProgressOutOfRange { subtask_id: SubtaskId, progress: f64 },
    /// The stored manual progress is outside [0, 100].
    ManualProgressOutOfRange {
        initiative_id: InitiativeId,
        progress: f64,
    },
}

impl fmt::Display for AggregationAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationAnomaly::WeightOverflow {
                initiative_id,
                total,
            } => write!(
                f,
                "active subtask weights of initiative {} sum to {}%",
                initiative_id, total
            ),
            AggregationAnomaly::WeightOutOfRange { subtask_id, weight } => {
                write!(f, "subtask {} has weight {} outside (0, 100]", subtask_id, weight)
            }
            AggregationAnomaly::ProgressOutOfRange {
                subtask_id,
                progress,
            } => write!(
                f,
                "subtask {} has progress {} outside [0, 100]",
                subtask_id, progress
            ),
            AggregationAnomaly::ManualProgressOutOfRange {
                initiative_id,
                progress,
            } => write!(
                f,
                "initiative {} has manual progress {} outside [0, 100]",
                initiative_id, progress
            ),
        }
    }
}

/// Result of a progress computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBreakdown {
    /// Percent complete, clamped and rounded to two decimals.
    pub percent: f64,
    pub source: ProgressSource,
    pub active_subtasks: usize,
    /// Active weight after clamping.
    pub total_weight: f64,
    pub anomalies: Vec<AggregationAnomaly>,
}

/// Stateless calculator configured with the hybrid threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressCalculator {
    hybrid_threshold: f64,
    epsilon: f64,
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ProgressCalculator {
    pub fn new(hybrid_threshold: f64, epsilon: f64) -> Self {
        Self {
            hybrid_threshold,
            epsilon,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.hybrid_threshold, config.weight_epsilon)
    }

    pub fn hybrid_threshold(&self) -> f64 {
        self.hybrid_threshold
    }

    /// Percent complete of `initiative`.
    pub fn percent(&self, initiative: &Initiative, subtasks: &[Subtask]) -> f64 {
        self.compute(initiative, subtasks).percent
    }

    /// Compute progress with its provenance.
    ///
    /// Inactive Subtasks and Subtasks of other Initiatives are ignored.
    /// Every anomaly found is logged at warn level.
    pub fn compute(&self, initiative: &Initiative, subtasks: &[Subtask]) -> ProgressBreakdown {
        let mut anomalies = Vec::new();

        let mut active_subtasks = 0usize;
        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        for subtask in subtasks
            .iter()
            .filter(|s| s.is_active && s.initiative_id == initiative.initiative_id)
        {
            active_subtasks += 1;
            let weight = sanitize_weight(subtask, &mut anomalies);
            let progress = sanitize_progress(subtask, &mut anomalies);
            total_weight += weight;
            weighted_sum += progress * weight;
        }

        if total_weight > MAX_TOTAL_WEIGHT + self.epsilon {
            anomalies.push(AggregationAnomaly::WeightOverflow {
                initiative_id: initiative.initiative_id,
                total: round2(total_weight),
            });
        }

        let (raw, source) = match initiative.progress_method {
            ProgressMethod::Manual => (manual_progress(initiative, &mut anomalies), ProgressSource::Manual),
            ProgressMethod::SubtaskBased => {
                let percent = if total_weight > 0.0 {
                    weighted_sum / total_weight
                } else {
                    0.0
                };
                (percent, ProgressSource::Subtasks)
            }
            ProgressMethod::Hybrid => {
                if total_weight + self.epsilon >= self.hybrid_threshold {
                    // Not renormalized: missing weight caps the result below 100.
                    (weighted_sum / MAX_TOTAL_WEIGHT, ProgressSource::Subtasks)
                } else {
                    (
                        manual_progress(initiative, &mut anomalies),
                        ProgressSource::HybridFallback,
                    )
                }
            }
        };

        for anomaly in &anomalies {
            warn!(
                initiative_id = %initiative.initiative_id,
                tenant_id = %initiative.tenant_id,
                %anomaly,
                "Aggregation anomaly"
            );
        }

        ProgressBreakdown {
            percent: round2(clamp_percent(raw)),
            source,
            active_subtasks,
            total_weight: round2(total_weight),
            anomalies,
        }
    }
}

fn sanitize_weight(subtask: &Subtask, anomalies: &mut Vec<AggregationAnomaly>) -> f64 {
    let weight = subtask.weight_percentage;
    if weight.is_finite() && weight > 0.0 && weight <= MAX_TOTAL_WEIGHT {
        return weight;
    }
    anomalies.push(AggregationAnomaly::WeightOutOfRange {
        subtask_id: subtask.subtask_id,
        weight,
    });
    if weight.is_finite() {
        weight.clamp(0.0, MAX_TOTAL_WEIGHT)
    } else {
        0.0
    }
}

fn sanitize_progress(subtask: &Subtask, anomalies: &mut Vec<AggregationAnomaly>) -> f64 {
    let progress = subtask.progress;
    if !(0.0..=100.0).contains(&progress) {
        anomalies.push(AggregationAnomaly::ProgressOutOfRange {
            subtask_id: subtask.subtask_id,
            progress,
        });
    }
    clamp_percent(progress)
}

fn manual_progress(initiative: &Initiative, anomalies: &mut Vec<AggregationAnomaly>) -> f64 {
    let progress = initiative.progress;
    if !(0.0..=100.0).contains(&progress) {
        anomalies.push(AggregationAnomaly::ManualProgressOutOfRange {
            initiative_id: initiative.initiative_id,
            progress,
        });
    }
    clamp_percent(progress)
}
