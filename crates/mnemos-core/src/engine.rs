//! The engine boundary.
//!
//! [`MemoryEngine`] wires every component over one shared ledger, clock and
//! configuration. Operations that write under optimistic concurrency are
//! retried once on `ConcurrentModification`; invariant violations are
//! logged with context and surfaced unchanged.

use std::future::Future;
use std::sync::Arc;

use mnemos_state::{
    ConflictFilter, ConflictId, ConflictRecord, DecisionId, DecisionQuery, DecisionRecord,
    Ledger, MemoryFilter, MemoryId, MemoryRecord, SurrealLedger, VersionId, VersionRecord,
};
use tracing::instrument;

use crate::api::{
    ConflictStatsResponse, DecisionListParams, DecisionListResponse, DecisionView, MemoryView,
    ReplayParams, ReplayResponse, SearchParams, VerifyOutcomeParams,
};
use crate::catalog::{MemoryCatalog, SearchRequest};
use crate::config::EngineConfig;
use crate::conflict::{
    ConfidenceAdjustment, ConflictDetector, ContradictionPredicate, LexicalPredicate,
    ResolveAction,
};
use crate::decision::{DecisionRecorder, RecordDecision};
use crate::domain::{Clock, EngineError, NewMemory, Result, SystemClock};
use crate::metrics::METRICS;
use crate::obs;
use crate::replay::{ReplayEngine, ReplayReport};
use crate::versioning::{VersionHistory, VersionManager};

/// A stateless service over a shared durable store.
#[derive(Clone)]
pub struct MemoryEngine {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    predicate: Arc<dyn ContradictionPredicate>,
    catalog: MemoryCatalog,
    versions: VersionManager,
    conflicts: ConflictDetector,
    decisions: DecisionRecorder,
    replay: ReplayEngine,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Build an engine with the system clock and the lexical predicate.
    pub fn new(ledger: Arc<dyn Ledger>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(
            ledger,
            Arc::new(config),
            Arc::new(SystemClock),
            Arc::new(LexicalPredicate),
        ))
    }

    /// Connect to the store named by the `SURREALDB_*` environment and load
    /// the config named by `MNEMOS_CONFIG`.
    pub async fn from_env() -> Result<Self> {
        let config = EngineConfig::from_env()?;
        let ledger = SurrealLedger::from_env()
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Self::new(Arc::new(ledger), config)
    }

    fn assemble(
        ledger: Arc<dyn Ledger>,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        predicate: Arc<dyn ContradictionPredicate>,
    ) -> Self {
        Self {
            catalog: MemoryCatalog::new(ledger.clone(), config.clone(), clock.clone()),
            versions: VersionManager::new(ledger.clone(), config.clone(), clock.clone()),
            conflicts: ConflictDetector::new(
                ledger.clone(),
                config.clone(),
                clock.clone(),
                predicate.clone(),
            ),
            decisions: DecisionRecorder::new(ledger.clone(), config.clone(), clock.clone()),
            replay: ReplayEngine::new(ledger.clone(), config.clone(), clock.clone()),
            ledger,
            config,
            clock,
            predicate,
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(self.ledger, self.config, clock, self.predicate)
    }

    pub fn with_predicate(self, predicate: Arc<dyn ContradictionPredicate>) -> Self {
        Self::assemble(self.ledger, self.config, self.clock, predicate)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    pub fn conflicts(&self) -> &ConflictDetector {
        &self.conflicts
    }

    pub fn decisions(&self) -> &DecisionRecorder {
        &self.decisions
    }

    pub fn replays(&self) -> &ReplayEngine {
        &self.replay
    }

    /// Run `f`, and once more if it fails with `ConcurrentModification`.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, target: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = match f().await {
            Err(e) if e.is_retryable() => {
                METRICS.inc_retries();
                obs::emit_retry(op, &e);
                f().await
            }
            other => other,
        };
        observed(op, target, result)
    }

    /// Run `fut` once. Invariant violations are logged like retried calls.
    async fn guarded<T>(
        &self,
        op: &'static str,
        target: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        observed(op, target, fut.await)
    }

    fn after_write(&self, memory_id: &MemoryId) {
        if self.config.conflicts.scan_on_write {
            drop(self.conflicts.spawn_scan(memory_id.clone()));
        }
    }

    // -- memories --------------------------------------------------------

    pub async fn ingest(&self, new: NewMemory) -> Result<MemoryRecord> {
        let target = format!("{}/{}", new.namespace, new.key);
        let memory = self
            .guarded("memory.ingest", &target, self.catalog.create(new))
            .await?;
        self.after_write(&memory.memory_id);
        Ok(memory)
    }

    pub async fn get_memory(&self, memory_id: &MemoryId) -> Result<MemoryRecord> {
        self.guarded("memory.get", memory_id.as_str(), self.catalog.get(memory_id))
            .await
    }

    pub async fn find_memory(&self, namespace: &str, key: &str) -> Result<Option<MemoryRecord>> {
        self.guarded("memory.find", key, self.catalog.find(namespace, key))
            .await
    }

    pub async fn list_memories(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        let target = filter.namespace.as_deref().unwrap_or("*");
        self.guarded("memory.list", target, self.catalog.list(filter))
            .await
    }

    /// Edit a memory. With `base_version_id` the edit only applies on top of
    /// that version; without it, on top of whatever is current.
    #[instrument(skip(self, content))]
    pub async fn edit(
        &self,
        memory_id: &MemoryId,
        base_version_id: Option<&VersionId>,
        content: &str,
        editor: &str,
    ) -> Result<VersionRecord> {
        let version = self
            .with_retry("memory.edit", memory_id.as_str(), move || async move {
                match base_version_id {
                    Some(base) => {
                        self.versions
                            .create_version_from(memory_id, base, content, editor)
                            .await
                    }
                    None => self.versions.create_version(memory_id, content, editor).await,
                }
            })
            .await?;
        self.after_write(memory_id);
        Ok(version)
    }

    pub async fn rollback(
        &self,
        memory_id: &MemoryId,
        to_version_id: &VersionId,
        editor: &str,
    ) -> Result<VersionRecord> {
        let version = self
            .with_retry("memory.rollback", memory_id.as_str(), move || {
                self.versions.rollback(memory_id, to_version_id, editor)
            })
            .await?;
        self.after_write(memory_id);
        Ok(version)
    }

    pub async fn history(&self, memory_id: &MemoryId) -> Result<VersionHistory> {
        self.with_retry("memory.history", memory_id.as_str(), move || {
            self.versions.history(memory_id)
        })
        .await
    }

    pub async fn tombstone(&self, memory_id: &MemoryId, actor: &str) -> Result<MemoryRecord> {
        self.with_retry("memory.tombstone", memory_id.as_str(), move || {
            self.catalog.tombstone(memory_id, actor)
        })
        .await
    }

    /// `memory.search`
    pub async fn memory_search(&self, params: SearchParams) -> Result<Vec<MemoryView>> {
        let request = SearchRequest {
            query: params.query,
            namespace: params.namespace,
            organization_id: params.organization_id,
            limit: params.limit,
        };
        let hits = self
            .guarded("memory.search", &request.query, self.catalog.search(&request))
            .await?;
        Ok(hits.into_iter().map(MemoryView::from).collect())
    }

    // -- conflicts -------------------------------------------------------

    pub async fn scan(&self, memory_id: &MemoryId) -> Result<Vec<ConflictRecord>> {
        self.guarded("conflict.scan", memory_id.as_str(), self.conflicts.scan(memory_id))
            .await
    }

    pub async fn full_scan(&self, namespace: &str) -> Result<Vec<ConflictRecord>> {
        self.guarded("conflict.full_scan", namespace, self.conflicts.full_scan(namespace))
            .await
    }

    pub async fn conflict_list(&self, filter: &ConflictFilter) -> Result<Vec<ConflictRecord>> {
        let target = filter.namespace.as_deref().unwrap_or("*");
        self.guarded("conflict.list", target, self.conflicts.list(filter))
            .await
    }

    pub async fn resolve(
        &self,
        conflict_id: &ConflictId,
        action: ResolveAction,
        adjustments: Vec<ConfidenceAdjustment>,
        actor: &str,
    ) -> Result<ConflictRecord> {
        self.with_retry("conflict.resolve", conflict_id.as_str(), move || {
            self.conflicts.resolve_with_adjustments(
                conflict_id,
                action.clone(),
                adjustments.clone(),
                actor,
            )
        })
        .await
    }

    /// `memory.getConflictStats`
    pub async fn conflict_stats(&self) -> Result<ConflictStatsResponse> {
        let stats = self
            .guarded("conflict.stats", "*", self.conflicts.stats())
            .await?;
        Ok(stats.into())
    }

    // -- decisions -------------------------------------------------------

    pub async fn decision_record(&self, request: RecordDecision) -> Result<DecisionRecord> {
        let target = format!("{}/{}", request.organization_id, request.agent_id);
        self.guarded("decision.record", &target, self.decisions.record(request))
            .await
    }

    pub async fn decision_get(&self, decision_id: &DecisionId) -> Result<DecisionRecord> {
        self.guarded("decision.get", decision_id.as_str(), self.decisions.get(decision_id))
            .await
    }

    /// `decision.list`
    pub async fn decision_list(&self, params: DecisionListParams) -> Result<DecisionListResponse> {
        let limit = self.config.limits.list_limit(params.limit)?;
        let query = DecisionQuery {
            organization_id: params.organization_id,
            agent_id: params.agent_id,
            verified: params.verified,
            limit,
            offset: params.offset.unwrap_or(0),
        };
        let page = self
            .guarded("decision.list", &query.organization_id, self.decisions.list(&query))
            .await?;
        Ok(page.into())
    }

    /// `decision.verifyOutcome`
    pub async fn decision_verify_outcome(&self, params: VerifyOutcomeParams) -> Result<DecisionView> {
        let decision = self
            .guarded(
                "decision.verify_outcome",
                params.decision_id.as_str(),
                self.decisions.verify_outcome(
                    &params.decision_id,
                    params.outcome_correct,
                    params.outcome_notes.clone(),
                ),
            )
            .await?;
        Ok(decision.into())
    }

    /// `decision.replay`
    pub async fn decision_replay(&self, params: ReplayParams) -> Result<ReplayResponse> {
        Ok(self.replay_report(&params.decision_id).await?.into())
    }

    pub async fn replay_report(&self, decision_id: &DecisionId) -> Result<ReplayReport> {
        self.guarded("decision.replay", decision_id.as_str(), self.replay.replay(decision_id))
            .await
    }
}

/// Log an invariant violation with the operation and its target, then pass
/// the result through unchanged.
fn observed<T>(op: &'static str, target: &str, result: Result<T>) -> Result<T> {
    if let Err(e @ EngineError::InvariantViolation(_)) = &result {
        obs::emit_invariant_violation(op, target, e);
    }
    result
}
