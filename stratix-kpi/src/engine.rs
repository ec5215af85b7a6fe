//! Progress engine facade.
//!
//! The two operations exposed to the presentation layer:
//!
//! - [`ProgressEngine::get_kpi_summary`] reads through the cache and never
//!   fails; a storage outage degrades to a stale or placeholder summary.
//! - [`ProgressEngine::upsert_subtask`] validates and commits a Subtask
//!   with an optimistic revision check, then invalidates before it
//!   acknowledges, so the writer's next read is never stale.

use std::sync::Arc;

use stratix_core::{
    Clock, ConcurrencyError, EngineConfig, EntityType, Initiative, InitiativeId,
    InitiativeProgress, KpiSummary, ProgressMethod, Revision, RoleScope, StorageError,
    StratixResult, Subtask, SubtaskId, SummaryFilter, TenantId, ValidationError,
};
use stratix_storage::{
    CacheManager, CacheRead, CommitOutcome, KpiCacheKey, ProgressStore, SubtaskWrite,
};
use tracing::{debug, warn};

use crate::aggregate::KpiAggregator;
use crate::invalidation::{InitiativeRef, InvalidationReport, InvalidationRouter, MutationEvent};
use crate::progress::ProgressCalculator;
use crate::refresh::RefreshHandle;
use crate::weights::WeightValidator;

/// Acknowledgement of a committed subtask write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    pub initiative_id: InitiativeId,
    pub subtask_id: SubtaskId,
    /// Initiative revision after the commit.
    pub revision: Revision,
    /// Initiative percent including this write.
    pub percent: f64,
    /// Active weight including this write.
    pub total_weight: f64,
    /// Commit attempts used, 1 when there was no conflict.
    pub attempts: u32,
    pub invalidation: InvalidationReport,
}

/// Engine over a storage collaborator and a cache manager.
pub struct ProgressEngine<S> {
    store: Arc<S>,
    aggregator: KpiAggregator<S>,
    validator: WeightValidator,
    router: InvalidationRouter,
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
    max_commit_retries: u32,
    refresh: Option<RefreshHandle>,
}

impl<S: ProgressStore> ProgressEngine<S> {
    /// Build an engine. Time comes from the cache manager's clock so TTLs,
    /// overdue checks and summary timestamps agree.
    pub fn new(store: Arc<S>, cache: Arc<CacheManager>, config: &EngineConfig) -> StratixResult<Self> {
        config.validate()?;
        let clock = cache.clock().clone();
        Ok(Self {
            aggregator: KpiAggregator::new(
                store.clone(),
                ProgressCalculator::from_config(config),
                clock.clone(),
            ),
            store,
            validator: WeightValidator::from_config(config),
            router: InvalidationRouter::new(),
            cache,
            clock,
            max_commit_retries: config.max_commit_retries.max(1),
            refresh: None,
        })
    }

    /// Ask `handle`'s refresh task to re-warm a tenant's executive summary
    /// after every invalidation this engine performs.
    ///
    /// The task holds the engine, so it then stops only on its shutdown
    /// signal.
    pub fn with_refresh(mut self, handle: RefreshHandle) -> Self {
        self.refresh = Some(handle);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn aggregator(&self) -> &KpiAggregator<S> {
        &self.aggregator
    }

    /// KPI summary for `scope` within `tenant_id`.
    ///
    /// Area-bound roles are narrowed to their own area before the key is
    /// built. Always returns a value; check [`CacheRead::is_degraded`].
    pub async fn get_kpi_summary(
        &self,
        tenant_id: TenantId,
        scope: RoleScope,
        filter: SummaryFilter,
    ) -> CacheRead<KpiSummary> {
        let filter = scope.constrain(filter);

        if scope.role.is_area_bound() && filter.area_id.is_none() {
            warn!(%tenant_id, role = %scope.role, "Area-bound role without an area, refusing tenant-wide summary");
            let now = self.clock.now();
            return CacheRead::unavailable(KpiSummary::empty(tenant_id, None, scope.role, now), now);
        }

        let key = KpiCacheKey::new(tenant_id, scope.role, &filter);
        let fetcher = self.aggregator.fetcher_for(filter);
        match self.cache.get_or_compute(&key, &fetcher).await {
            Ok(read) => read,
            Err(e) => {
                warn!(%key, error = %e, "KPI summary unavailable, serving empty summary");
                let now = self.clock.now();
                CacheRead::unavailable(
                    KpiSummary::empty(tenant_id, filter.area_id, scope.role, now),
                    now,
                )
            }
        }
    }

    /// Create or replace a Subtask.
    ///
    /// # Errors
    ///
    /// - `WeightExceeded` when the write alone would push the active weight
    ///   over 100
    /// - `WeightConflict` when concurrent writers kept moving the Initiative,
    ///   or when the write only stopped fitting because of them
    /// - `InvalidWeight`, `InvalidProgress`, `InitiativeMismatch` for
    ///   malformed input
    /// - `NotFound` for an unknown or deactivated Initiative
    pub async fn upsert_subtask(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
        subtask: Subtask,
    ) -> StratixResult<WriteAck> {
        self.commit_write(tenant_id, initiative_id, SubtaskWrite::Upsert(subtask))
            .await
    }

    /// Soft-deactivate a Subtask. Never rejected for weight.
    pub async fn remove_subtask(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
        subtask_id: SubtaskId,
    ) -> StratixResult<WriteAck> {
        self.commit_write(tenant_id, initiative_id, SubtaskWrite::Deactivate(subtask_id))
            .await
    }

    /// Current progress of one Initiative, computed from storage.
    pub async fn initiative_progress(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
    ) -> StratixResult<Option<InitiativeProgress>> {
        let Some(initiative) = self.store.fetch_initiative(tenant_id, initiative_id).await? else {
            return Ok(None);
        };
        let evaluated = self.aggregator.evaluate(initiative).await?;
        Ok(Some(evaluated.to_progress(self.clock.now())))
    }

    /// Invalidate for a mutation made by another collaborator.
    pub async fn notify(&self, event: MutationEvent) -> InvalidationReport {
        debug!(kind = event.kind(), tenant_id = %event.tenant_id(), "Mutation notification");
        let report = self.router.on_mutation(&event).execute(&self.cache).await;
        self.request_refresh(event.tenant_id());
        report
    }

    fn request_refresh(&self, tenant_id: TenantId) {
        if let Some(handle) = &self.refresh {
            if !handle.request(tenant_id) {
                debug!(%tenant_id, "Refresh task stopped, request dropped");
            }
        }
    }

    /// Validate-then-commit with bounded optimistic retries.
    async fn commit_write(
        &self,
        tenant_id: TenantId,
        initiative_id: InitiativeId,
        write: SubtaskWrite,
    ) -> StratixResult<WriteAck> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let initiative = self
                .store
                .fetch_initiative(tenant_id, initiative_id)
                .await?
                .filter(|i| i.is_active)
                .ok_or(StorageError::NotFound {
                    entity_type: EntityType::Initiative,
                    id: initiative_id,
                })?;
            let siblings = self.store.fetch_subtasks(initiative_id).await?;

            match self.validator.validate(initiative_id, &siblings, &write) {
                Ok(_) => {}
                Err(ValidationError::WeightExceeded { total, .. }) if attempt > 1 => {
                    debug!(%initiative_id, attempt, total, "Write no longer fits after a concurrent commit");
                    return Err(ConcurrencyError::WeightConflict {
                        initiative_id,
                        attempts: attempt,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }

            let event = mutation_event(&initiative, &siblings, &write);
            match self
                .store
                .commit_subtask_write(initiative_id, write.clone(), initiative.revision)
                .await?
            {
                CommitOutcome::Committed(revision) => {
                    return Ok(self
                        .after_commit(initiative, siblings, write, revision, attempt, event)
                        .await);
                }
                CommitOutcome::Conflict { current } => {
                    debug!(
                        %initiative_id,
                        attempt,
                        expected = %initiative.revision,
                        %current,
                        "Subtask commit conflict"
                    );
                    if attempt >= self.max_commit_retries {
                        return Err(ConcurrencyError::WeightConflict {
                            initiative_id,
                            attempts: attempt,
                        }
                        .into());
                    }
                }
            }
        }
    }

    /// Invalidate, then derive the new percent. The write is durable at this
    /// point, so nothing here may fail the request.
    async fn after_commit(
        &self,
        initiative: Initiative,
        mut siblings: Vec<Subtask>,
        write: SubtaskWrite,
        revision: Revision,
        attempts: u32,
        event: MutationEvent,
    ) -> WriteAck {
        let invalidation = self.router.on_mutation(&event).execute(&self.cache).await;
        if !invalidation.is_fenced() {
            warn!(initiative_id = %initiative.initiative_id, "Invalidation not fenced by the journal");
        }
        self.request_refresh(initiative.tenant_id);

        let subtask_id = write.subtask_id();
        apply_write(&mut siblings, write);
        let breakdown = self.aggregator.calculator().compute(&initiative, &siblings);

        if initiative.progress_method == ProgressMethod::SubtaskBased {
            match self
                .store
                .record_initiative_progress(initiative.initiative_id, breakdown.percent, revision)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(initiative_id = %initiative.initiative_id, %revision, "Derived progress superseded by a later commit");
                }
                Err(e) => {
                    warn!(initiative_id = %initiative.initiative_id, error = %e, "Failed to record derived progress");
                }
            }
        }

        WriteAck {
            initiative_id: initiative.initiative_id,
            subtask_id,
            revision,
            percent: breakdown.percent,
            total_weight: breakdown.total_weight,
            attempts,
            invalidation,
        }
    }
}

fn mutation_event(initiative: &Initiative, siblings: &[Subtask], write: &SubtaskWrite) -> MutationEvent {
    let initiative_ref = InitiativeRef {
        tenant_id: initiative.tenant_id,
        area_id: initiative.area_id,
        initiative_id: initiative.initiative_id,
    };
    let subtask_id = write.subtask_id();
    match write {
        SubtaskWrite::Deactivate(_) => MutationEvent::SubtaskDeleted {
            initiative: initiative_ref,
            subtask_id,
        },
        SubtaskWrite::Upsert(_) if siblings.iter().any(|s| s.subtask_id == subtask_id) => {
            MutationEvent::SubtaskUpdated {
                initiative: initiative_ref,
                subtask_id,
            }
        }
        SubtaskWrite::Upsert(_) => MutationEvent::SubtaskCreated {
            initiative: initiative_ref,
            subtask_id,
        },
    }
}

fn apply_write(siblings: &mut Vec<Subtask>, write: SubtaskWrite) {
    match write {
        SubtaskWrite::Upsert(subtask) => {
            match siblings.iter_mut().find(|s| s.subtask_id == subtask.subtask_id) {
                Some(existing) => *existing = subtask,
                None => siblings.push(subtask),
            }
        }
        SubtaskWrite::Deactivate(subtask_id) => {
            if let Some(existing) = siblings.iter_mut().find(|s| s.subtask_id == subtask_id) {
                existing.is_active = false;
            }
        }
    }
}
