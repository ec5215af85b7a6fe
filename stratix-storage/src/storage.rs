//! Storage collaborator contract.
//!
//! The engine never owns durable records. It reads Initiatives and Subtasks
//! through [`ProgressStore`] and commits subtask writes through a single
//! revision-checked call, so validate-then-write can be made atomic without
//! the engine holding any lock.

use std::sync::Arc;

use async_trait::async_trait;
use stratix_core::{
    Initiative, InitiativeId, Revision, StratixResult, Subtask, SubtaskId, SummaryFilter, TenantId,
};

/// A single subtask mutation, applied atomically with a revision check.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtaskWrite {
    /// Insert a new subtask or replace the one with the same id.
    Upsert(Subtask),
    /// Soft-deactivate an existing subtask.
    Deactivate(SubtaskId),
}

impl SubtaskWrite {
    /// Id of the subtask being written.
    pub fn subtask_id(&self) -> SubtaskId {
        match self {
            SubtaskWrite::Upsert(subtask) => subtask.subtask_id,
            SubtaskWrite::Deactivate(id) => *id,
        }
    }
}

/// Result of a conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write was applied; the Initiative is now at this revision.
    Committed(Revision),
    /// The Initiative moved on since the caller read it. Nothing was written.
    Conflict { current: Revision },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// Storage operations consumed by the engine.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the active Initiatives of a tenant selected by `filter`.
    async fn fetch_initiatives(
        &self,
        tenant_id: TenantId,
        filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>>;

    /// Fetch one Initiative, active or not, with its current revision.
    async fn fetch_initiative(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>>;

    /// Fetch every Subtask of an Initiative, including deactivated ones.
    async fn fetch_subtasks(&self, initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>>;

    /// Apply `write` only if the Initiative is still at `expected`.
    ///
    /// The revision check and the write must be one atomic step. A committed
    /// write bumps the Initiative's revision.
    async fn commit_subtask_write(
        &self,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
        expected: Revision,
    ) -> StratixResult<CommitOutcome>;

    /// Write back a progress value derived from the subtasks committed at
    /// revision `at`. Does not change the revision.
    ///
    /// Write-backs may arrive out of order. A value derived at a revision
    /// older than the last recorded one must be dropped; the return value
    /// says whether `percent` was stored.
    async fn record_initiative_progress(
        &self,
        initiative_id: InitiativeId,
        percent: f64,
        at: Revision,
    ) -> StratixResult<bool>;
}

#[async_trait]
impl<S: ProgressStore + ?Sized> ProgressStore for Arc<S> {
    async fn fetch_initiatives(
        &self,
        tenant_id: TenantId,
        filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>> {
        (**self).fetch_initiatives(tenant_id, filter).await
    }

    async fn fetch_initiative(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>> {
        (**self).fetch_initiative(tenant_id, initiative_id).await
    }

    async fn fetch_subtasks(&self, initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>> {
        (**self).fetch_subtasks(initiative_id).await
    }

    async fn commit_subtask_write(
        &self,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
        expected: Revision,
    ) -> StratixResult<CommitOutcome> {
        (**self)
            .commit_subtask_write(initiative_id, write, expected)
            .await
    }

    async fn record_initiative_progress(
        &self,
        initiative_id: InitiativeId,
        percent: f64,
        at: Revision,
    ) -> StratixResult<bool> {
        (**self)
            .record_initiative_progress(initiative_id, percent, at)
            .await
    }
}
