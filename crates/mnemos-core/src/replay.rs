//! Decision replay and context drift.
//!
//! Replay reads a recorded decision, looks up what became of every memory
//! it used, and summarizes the difference:
//!
//! ```text
//! fractionRemoved = removed / total                      (0 when total = 0)
//! avgScoreChange  = mean(currentScore − scoreAtDecision) over available memories
//! drift           = removedWeight × fractionRemoved
//!                 + scoreChangeWeight × min(|avgScoreChange| / baselineScoreRange, 1)
//! ```
//!
//! Replay never writes. Its output is a pure function of the stored state
//! and the evaluation instant, and the analysis digest is a SHA-256 over the
//! analysis JSON, so two replays of the same state compare byte for byte.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemos_state::{
    ContentType, DecisionId, DecisionRecord, Ledger, MemoryId, MemoryRecord, MemorySnapshot,
    StorageError, VersionId,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::config::{DriftConfig, EngineConfig};
use crate::domain::{Clock, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::ScoringEngine;

/// One decision-time snapshot annotated with the memory's present state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalMemory {
    pub memory_id: MemoryId,
    pub version_id: VersionId,
    pub namespace: String,
    pub content: String,
    pub content_type: ContentType,
    pub score_at_decision: f64,
    /// The memory still exists and is neither deprecated nor tombstoned.
    pub still_available: bool,
    /// The memory has been edited since the decision.
    pub content_changed: bool,
    pub current_score: Option<f64>,
    pub score_change: Option<f64>,
}

impl HistoricalMemory {
    fn annotate(snapshot: &MemorySnapshot, current: Option<(&MemoryRecord, f64)>) -> Self {
        let available = current.filter(|(memory, _)| memory.is_active());
        Self {
            memory_id: snapshot.memory_id.clone(),
            version_id: snapshot.version_id.clone(),
            namespace: snapshot.namespace.clone(),
            content: snapshot.content.clone(),
            content_type: snapshot.content_type,
            score_at_decision: snapshot.score_at_decision,
            still_available: available.is_some(),
            content_changed: current
                .is_some_and(|(memory, _)| memory.current_version_id != snapshot.version_id),
            current_score: available.map(|(_, score)| score),
            score_change: available.map(|(_, score)| score - snapshot.score_at_decision),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayAnalysis {
    pub memories_still_available: usize,
    pub memories_removed: usize,
    /// Mean score change over available memories; 0 when none are.
    pub avg_score_change: f64,
    /// Normalized to `[0, 1]`.
    pub context_drift_score: f64,
    /// Unavailable memories in snapshot order.
    pub removed_memory_ids: Vec<MemoryId>,
}

impl ReplayAnalysis {
    pub fn compute(memories: &[HistoricalMemory], drift: &DriftConfig) -> Self {
        let changes: Vec<f64> = memories.iter().filter_map(|m| m.score_change).collect();
        let removed_memory_ids: Vec<MemoryId> = memories
            .iter()
            .filter(|m| !m.still_available)
            .map(|m| m.memory_id.clone())
            .collect();

        let avg_score_change = if changes.is_empty() {
            0.0
        } else {
            changes.iter().sum::<f64>() / changes.len() as f64
        };
        let fraction_removed = if memories.is_empty() {
            0.0
        } else {
            removed_memory_ids.len() as f64 / memories.len() as f64
        };
        let normalized_change = (avg_score_change.abs() / drift.baseline_score_range).min(1.0);
        let context_drift_score = (drift.removed_weight * fraction_removed
            + drift.score_change_weight * normalized_change)
            .clamp(0.0, 1.0);

        Self {
            memories_still_available: memories.len() - removed_memory_ids.len(),
            memories_removed: removed_memory_ids.len(),
            avg_score_change,
            context_drift_score,
            removed_memory_ids,
        }
    }

    /// SHA-256 hex of the analysis JSON.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub decision: DecisionRecord,
    pub historical_memories: Vec<HistoricalMemory>,
    pub analysis: ReplayAnalysis,
    pub analysis_digest: String,
    /// Instant the current scores were evaluated at.
    pub evaluated_at: DateTime<Utc>,
}

/// Floor `now` to a multiple of `bucket_secs` since the epoch.
pub fn bucket_instant(now: DateTime<Utc>, bucket_secs: u64) -> DateTime<Utc> {
    let Ok(bucket) = i64::try_from(bucket_secs) else {
        return now;
    };
    if bucket == 0 {
        return now;
    }
    let secs = now.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(bucket), 0).unwrap_or(now)
}

#[derive(Clone)]
pub struct ReplayEngine {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl ReplayEngine {
    pub fn new(ledger: Arc<dyn Ledger>, config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            config,
            clock,
        }
    }

    /// Replay at the clock's "now", floored to the configured time bucket.
    pub async fn replay(&self, decision_id: &DecisionId) -> Result<ReplayReport> {
        let now = bucket_instant(self.clock.now(), self.config.drift.time_bucket_secs);
        self.replay_at(decision_id, now).await
    }

    /// Replay with current scores evaluated at exactly `now`.
    #[instrument(skip(self))]
    pub async fn replay_at(
        &self,
        decision_id: &DecisionId,
        now: DateTime<Utc>,
    ) -> Result<ReplayReport> {
        let decision = self.ledger.get_decision(decision_id).await?;
        let org = Some(decision.organization_id.as_str());
        let scoring = ScoringEngine::new(self.config.scoring_for(org));
        let drift = self.config.drift_for(org);

        let mut historical_memories = Vec::with_capacity(decision.retrieved_memories.len());
        for snapshot in &decision.retrieved_memories {
            let current = match self.ledger.get_memory(&snapshot.memory_id).await {
                Ok(memory) => Some(memory),
                Err(StorageError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            let scored = current
                .as_ref()
                .map(|memory| (memory, scoring.score(memory, now).total_score));
            historical_memories.push(HistoricalMemory::annotate(snapshot, scored));
        }

        let analysis = ReplayAnalysis::compute(&historical_memories, &drift);
        let analysis_digest = analysis.digest()?;

        METRICS.inc_replays();
        obs::emit_decision_replayed(
            decision.decision_id.as_str(),
            analysis.memories_removed,
            analysis.context_drift_score,
            &analysis_digest,
        );
        Ok(ReplayReport {
            decision,
            historical_memories,
            analysis,
            analysis_digest,
            evaluated_at: now,
        })
    }
}
