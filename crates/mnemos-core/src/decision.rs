//! Decision audit trail.
//!
//! A decision snapshots every retrieved memory by value (content, version
//! and score breakdown at decision time), so later edits, deprecations or
//! tombstones never change what the record says the agent saw.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use mnemos_state::{
    DecisionId, DecisionOutcome, DecisionPage, DecisionQuery, DecisionRecord, Ledger, MemoryId,
    MemorySnapshot,
};
use tracing::instrument;

use crate::config::EngineConfig;
use crate::domain::memory::{require_non_empty, validate_unit_interval};
use crate::domain::{Clock, Result, ValidationError};
use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::ScoringEngine;

/// Input for [`DecisionRecorder::record`].
#[derive(Debug, Clone)]
pub struct RecordDecision {
    pub agent_id: String,
    pub organization_id: String,
    pub input_query: String,
    pub output: String,
    pub confidence: f64,
    /// In retrieval order; the snapshot list keeps this order.
    pub retrieved_memory_ids: Vec<MemoryId>,
    pub model_used: String,
    pub latency_ms: u64,
}

impl RecordDecision {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty("agent_id", &self.agent_id)?;
        require_non_empty("organization_id", &self.organization_id)?;
        require_non_empty("input_query", &self.input_query)?;
        require_non_empty("model_used", &self.model_used)?;
        validate_unit_interval("confidence", self.confidence)?;
        let mut seen = HashSet::new();
        for id in &self.retrieved_memory_ids {
            if !seen.insert(id) {
                return Err(ValidationError::DuplicateMemory {
                    memory_id: id.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct DecisionRecorder {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl DecisionRecorder {
    pub fn new(ledger: Arc<dyn Ledger>, config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            config,
            clock,
        }
    }

    /// Snapshot the retrieved memories and append the decision. Usage
    /// counts of every referenced memory are incremented in the same write.
    #[instrument(skip(self, request), fields(agent_id = %request.agent_id, org = %request.organization_id))]
    pub async fn record(&self, request: RecordDecision) -> Result<DecisionRecord> {
        request.validate()?;

        let now = self.clock.now();
        let scoring = ScoringEngine::new(self.config.scoring_for(Some(request.organization_id.as_str())));
        let memories = try_join_all(
            request
                .retrieved_memory_ids
                .iter()
                .map(|id| self.ledger.get_memory(id)),
        )
        .await?;
        let snapshots: Vec<MemorySnapshot> = memories
            .into_iter()
            .map(|memory| {
                let breakdown = scoring.score(&memory, now);
                MemorySnapshot {
                    memory_id: memory.memory_id,
                    version_id: memory.current_version_id,
                    namespace: memory.namespace,
                    content: memory.content,
                    content_type: memory.content_type,
                    score_at_decision: breakdown.total_score,
                    breakdown,
                }
            })
            .collect();

        let decision = DecisionRecord {
            decision_id: DecisionId::new(),
            agent_id: request.agent_id,
            organization_id: request.organization_id,
            input_query: request.input_query,
            output: request.output,
            confidence: request.confidence,
            retrieved_memories: snapshots,
            model_used: request.model_used,
            latency_ms: request.latency_ms,
            created_at: now,
            outcome_verified: false,
            outcome_correct: None,
            outcome_notes: None,
            verified_at: None,
        };
        self.ledger.insert_decision(decision.clone()).await?;

        METRICS.inc_decisions_recorded();
        obs::emit_decision_recorded(
            decision.decision_id.as_str(),
            &decision.agent_id,
            decision.retrieved_memories.len(),
        );
        Ok(decision)
    }

    /// Set the outcome once. A second call fails with `AlreadyVerified`
    /// and leaves the first outcome untouched.
    #[instrument(skip(self, notes))]
    pub async fn verify_outcome(
        &self,
        decision_id: &DecisionId,
        correct: bool,
        notes: Option<String>,
    ) -> Result<DecisionRecord> {
        let notes = notes.filter(|n| !n.trim().is_empty());
        let decision = self
            .ledger
            .set_outcome(
                decision_id,
                DecisionOutcome {
                    correct,
                    notes,
                    verified_at: self.clock.now(),
                },
            )
            .await?;

        METRICS.inc_decisions_verified();
        obs::emit_decision_verified(decision.decision_id.as_str(), correct);
        Ok(decision)
    }

    pub async fn get(&self, decision_id: &DecisionId) -> Result<DecisionRecord> {
        Ok(self.ledger.get_decision(decision_id).await?)
    }

    /// Conjunctive filter, newest first. `query.limit` is checked against
    /// the configured maximum.
    pub async fn list(&self, query: &DecisionQuery) -> Result<DecisionPage> {
        require_non_empty("organization_id", &query.organization_id)?;
        self.config.limits.list_limit(Some(query.limit))?;
        Ok(self.ledger.list_decisions(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineError, FixedClock};
    use chrono::{TimeZone, Utc};
    use mnemos_state::fakes::InMemoryLedger;

    fn recorder() -> DecisionRecorder {
        DecisionRecorder::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(EngineConfig::default()),
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            )),
        )
    }

    fn request(ids: Vec<MemoryId>) -> RecordDecision {
        RecordDecision {
            agent_id: "agent-1".to_string(),
            organization_id: "acme".to_string(),
            input_query: "when can we deploy?".to_string(),
            output: "not on Fridays".to_string(),
            confidence: 0.7,
            retrieved_memory_ids: ids,
            model_used: "model-x".to_string(),
            latency_ms: 120,
        }
    }

    #[tokio::test]
    async fn test_duplicate_memory_ids_rejected() {
        let err = recorder()
            .record(request(vec!["m".into(), "m".into()]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::DuplicateMemory { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_memory_is_not_found_and_nothing_written() {
        let recorder = recorder();
        let err = recorder
            .record(request(vec!["missing".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "memory", .. }));
        let page = recorder.list(&DecisionQuery::for_org("acme")).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_decision_without_memories_is_allowed() {
        let recorder = recorder();
        let d = recorder.record(request(Vec::new())).await.unwrap();
        assert!(d.retrieved_memories.is_empty());
        assert!(!d.outcome_verified);
    }

    #[tokio::test]
    async fn test_list_limit_checked() {
        let err = recorder()
            .list(&DecisionQuery::for_org("acme").with_limit(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::BadLimit { .. })
        ));
    }
}
