//! Stratix KPI - Weighted Progress and KPI Aggregation
//!
//! Leaf first:
//!
//! - [`weights`]: keeps the active Subtask weights of an Initiative at or
//!   below 100
//! - [`progress`]: one Initiative's percent complete, per progress method
//! - [`aggregate`]: rolls Initiative progress up into KPI summaries
//! - [`invalidation`]: maps mutations to the cache keys they make stale
//! - [`engine`]: the read and write operations, wired through the cache
//! - [`refresh`]: optional background re-warming of tenant summaries

pub mod aggregate;
pub mod engine;
pub mod invalidation;
pub mod progress;
pub mod refresh;
pub mod weights;

pub use aggregate::{reduce, EvaluatedInitiative, KpiAggregator, SummaryFetch};
pub use engine::{ProgressEngine, WriteAck};
pub use invalidation::{
    InitiativeRef, InvalidationPlan, InvalidationReport, InvalidationRouter, MutationEvent,
};
pub use progress::{AggregationAnomaly, ProgressBreakdown, ProgressCalculator};
pub use refresh::{
    aggregate_refresh_task, refresh_channel, RefreshHandle, RefreshMetrics, RefreshSnapshot,
};
pub use weights::{total_active_weight, WeightCheck, WeightValidator, MAX_TOTAL_WEIGHT};
