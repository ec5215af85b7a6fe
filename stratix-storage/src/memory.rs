//! In-memory revisioned store.
//!
//! Reference implementation of [`ProgressStore`]. All state sits behind one
//! `tokio::sync::RwLock`, which makes the revision check and the write of
//! `commit_subtask_write` a single critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use stratix_core::{
    AreaId, EntityType, Initiative, InitiativeId, Revision, StorageError, StratixResult, Subtask,
    SummaryFilter, TenantId, ValidationError,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::{CommitOutcome, ProgressStore, SubtaskWrite};

#[derive(Debug, Default)]
struct StoreState {
    initiatives: HashMap<InitiativeId, Initiative>,
    subtasks: HashMap<InitiativeId, Vec<Subtask>>,
    /// Revision each recorded derived progress was computed at.
    progress_revisions: HashMap<InitiativeId, Revision>,
}

/// In-memory [`ProgressStore`] with optimistic revision checks.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    state: RwLock<StoreState>,
}

fn initiative_not_found(initiative_id: InitiativeId) -> StorageError {
    StorageError::NotFound {
        entity_type: EntityType::Initiative,
        id: initiative_id,
    }
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an Initiative as-is.
    pub async fn insert_initiative(&self, initiative: Initiative) {
        let mut state = self.state.write().await;
        state
            .subtasks
            .entry(initiative.initiative_id)
            .or_default();
        state
            .initiatives
            .insert(initiative.initiative_id, initiative);
    }

    /// Seed a Subtask directly, bypassing revision checks.
    ///
    /// Intended for fixtures and for reproducing records written by a
    /// collaborator that skipped validation.
    pub async fn insert_subtask(&self, subtask: Subtask) -> StratixResult<()> {
        let mut state = self.state.write().await;
        if !state.initiatives.contains_key(&subtask.initiative_id) {
            return Err(initiative_not_found(subtask.initiative_id).into());
        }
        let siblings = state.subtasks.entry(subtask.initiative_id).or_default();
        match siblings.iter_mut().find(|s| s.subtask_id == subtask.subtask_id) {
            Some(existing) => *existing = subtask,
            None => siblings.push(subtask),
        }
        Ok(())
    }

    /// Soft-deactivate an Initiative. Returns whether it was active.
    pub async fn deactivate_initiative(&self, initiative_id: InitiativeId) -> StratixResult<bool> {
        let mut state = self.state.write().await;
        let initiative = state
            .initiatives
            .get_mut(&initiative_id)
            .ok_or_else(|| initiative_not_found(initiative_id))?;
        let was_active = initiative.is_active;
        initiative.is_active = false;
        initiative.revision = initiative.revision.next();
        initiative.updated_at = Utc::now();
        Ok(was_active)
    }

    /// Move an Initiative to another area. Returns the previous area.
    pub async fn reassign_area(
        &self,
        initiative_id: InitiativeId,
        area_id: AreaId,
    ) -> StratixResult<AreaId> {
        let mut state = self.state.write().await;
        let initiative = state
            .initiatives
            .get_mut(&initiative_id)
            .ok_or_else(|| initiative_not_found(initiative_id))?;
        let previous = initiative.area_id;
        initiative.area_id = area_id;
        initiative.revision = initiative.revision.next();
        initiative.updated_at = Utc::now();
        Ok(previous)
    }

    /// Sum of active subtask weights, for invariant checks.
    pub async fn active_weight_sum(&self, initiative_id: InitiativeId) -> f64 {
        let state = self.state.read().await;
        state
            .subtasks
            .get(&initiative_id)
            .map(|subtasks| {
                subtasks
                    .iter()
                    .filter(|s| s.is_active)
                    .map(|s| s.weight_percentage)
                    .sum()
            })
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn fetch_initiatives(
        &self,
        tenant_id: TenantId,
        filter: &SummaryFilter,
    ) -> StratixResult<Vec<Initiative>> {
        let state = self.state.read().await;
        let mut initiatives: Vec<Initiative> = state
            .initiatives
            .values()
            .filter(|i| i.tenant_id == tenant_id && filter.matches(i))
            .cloned()
            .collect();
        // UUIDv7 ids sort by creation time.
        initiatives.sort_by_key(|i| i.initiative_id);
        Ok(initiatives)
    }

    async fn fetch_initiative(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<Initiative>> {
        let state = self.state.read().await;
        Ok(state
            .initiatives
            .get(&initiative_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn fetch_subtasks(&self, initiative_id: InitiativeId) -> StratixResult<Vec<Subtask>> {
        let state = self.state.read().await;
        Ok(state
            .subtasks
            .get(&initiative_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_subtask_write(
        &self,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
        expected: Revision,
    ) -> StratixResult<CommitOutcome> {
        let mut state = self.state.write().await;

        let current = state
            .initiatives
            .get(&initiative_id)
            .map(|i| i.revision)
            .ok_or_else(|| initiative_not_found(initiative_id))?;

        if current != expected {
            debug!(%initiative_id, %expected, %current, "Subtask commit rejected on stale revision");
            return Ok(CommitOutcome::Conflict { current });
        }

        let now = Utc::now();
        let siblings = state.subtasks.entry(initiative_id).or_default();
        match write {
            SubtaskWrite::Upsert(mut subtask) => {
                if subtask.initiative_id != initiative_id {
                    return Err(ValidationError::InitiativeMismatch {
                        expected: initiative_id,
                        got: subtask.initiative_id,
                    }
                    .into());
                }
                subtask.updated_at = now;
                match siblings
                    .iter_mut()
                    .find(|s| s.subtask_id == subtask.subtask_id)
                {
                    Some(existing) => {
                        subtask.created_at = existing.created_at;
                        *existing = subtask;
                    }
                    None => siblings.push(subtask),
                }
            }
            SubtaskWrite::Deactivate(subtask_id) => {
                let existing = siblings
                    .iter_mut()
                    .find(|s| s.subtask_id == subtask_id)
                    .ok_or(StorageError::NotFound {
                        entity_type: EntityType::Subtask,
                        id: subtask_id,
                    })?;
                existing.is_active = false;
                existing.updated_at = now;
            }
        }

        let initiative = state
            .initiatives
            .get_mut(&initiative_id)
            .ok_or_else(|| initiative_not_found(initiative_id))?;
        initiative.revision = initiative.revision.next();
        initiative.updated_at = now;

        Ok(CommitOutcome::Committed(initiative.revision))
    }

    async fn record_initiative_progress(
        &self,
        initiative_id: InitiativeId,
        percent: f64,
        at: Revision,
    ) -> StratixResult<bool> {
        let mut state = self.state.write().await;
        if !state.initiatives.contains_key(&initiative_id) {
            return Err(initiative_not_found(initiative_id).into());
        }
        if let Some(recorded) = state.progress_revisions.get(&initiative_id) {
            if *recorded >= at {
                debug!(%initiative_id, %at, %recorded, "Derived progress superseded, not recorded");
                return Ok(false);
            }
        }
        state.progress_revisions.insert(initiative_id, at);
        let initiative = state
            .initiatives
            .get_mut(&initiative_id)
            .ok_or_else(|| initiative_not_found(initiative_id))?;
        initiative.progress = percent;
        Ok(true)
    }
}
