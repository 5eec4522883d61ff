//! Request and response shapes of the RPC surface.
//!
//! Field names are camelCase on the wire. Records are converted into views
//! here so storage types never leak their column names to callers.

use chrono::{DateTime, Utc};
use mnemos_state::{
    ConflictRecord, ConflictStats, ConflictStatus, ContentType, DecisionId, DecisionPage,
    DecisionRecord, Deprecation, MemoryMetadata, MemoryRecord, MemorySnapshot, ResolutionAction,
    ScoreBreakdown, VersionRecord,
};
use serde::{Deserialize, Serialize};

use crate::catalog::SearchHit;
use crate::domain::EngineError;
use crate::replay::{HistoricalMemory, ReplayAnalysis, ReplayReport};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// `memory.search`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `decision.list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionListParams {
    #[serde(alias = "orgId")]
    pub organization_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Absent means no filter.
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// `decision.verifyOutcome`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcomeParams {
    pub decision_id: DecisionId,
    pub outcome_correct: bool,
    #[serde(default)]
    pub outcome_notes: Option<String>,
}

/// `decision.replay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayParams {
    pub decision_id: DecisionId,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryView {
    pub id: String,
    pub namespace: String,
    pub key: String,
    pub content: String,
    pub content_type: ContentType,
    pub confidence: f64,
    pub usage_count: u64,
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub current_version_id: String,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deprecated: Option<Deprecation>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<ScoreBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevance: Option<f64>,
}

impl From<MemoryRecord> for MemoryView {
    fn from(m: MemoryRecord) -> Self {
        Self {
            active: m.is_active(),
            id: m.memory_id.0,
            namespace: m.namespace,
            key: m.key,
            content: m.content,
            content_type: m.content_type,
            confidence: m.confidence,
            usage_count: m.usage_count,
            metadata: m.metadata,
            created_at: m.created_at,
            created_by: m.created_by,
            current_version_id: m.current_version_id.0,
            revision: m.revision,
            updated_at: m.updated_at,
            deprecated: m.deprecated,
            score: None,
            relevance: None,
        }
    }
}

impl From<SearchHit> for MemoryView {
    fn from(hit: SearchHit) -> Self {
        Self {
            score: Some(hit.score),
            relevance: Some(hit.relevance),
            ..MemoryView::from(hit.memory)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionView {
    pub version_id: String,
    pub memory_id: String,
    pub parent_version_id: Option<String>,
    pub content: String,
    pub content_digest: String,
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
    pub restored_from: Option<String>,
}

impl From<VersionRecord> for VersionView {
    fn from(v: VersionRecord) -> Self {
        Self {
            version_id: v.version_id.0,
            memory_id: v.memory_id.0,
            parent_version_id: v.parent_version_id.map(|p| p.0),
            content: v.content,
            content_digest: v.content_digest,
            edited_by: v.edited_by,
            edited_at: v.edited_at,
            restored_from: v.restored_from.map(|r| r.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictView {
    pub id: String,
    pub memory_a: String,
    pub memory_b: String,
    pub namespace: String,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolution_action: Option<String>,
    /// Survivor of a merge or loser of a deprecate-one.
    pub resolution_target: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<ConflictRecord> for ConflictView {
    fn from(c: ConflictRecord) -> Self {
        let (action, target) = match c.resolution.as_ref().map(|r| &r.action) {
            None => (None, None),
            Some(ResolutionAction::KeepBoth) => (Some("keep-both"), None),
            Some(ResolutionAction::Merge { survivor }) => (Some("merge"), Some(survivor.to_string())),
            Some(ResolutionAction::DeprecateOne { loser }) => {
                (Some("deprecate-one"), Some(loser.to_string()))
            }
        };
        Self {
            id: c.conflict_id.0,
            memory_a: c.pair.memory_a.0,
            memory_b: c.pair.memory_b.0,
            namespace: c.namespace,
            detected_at: c.detected_at,
            status: c.status,
            resolution_action: action.map(str::to_string),
            resolution_target: target,
            resolved_by: c.resolution.as_ref().map(|r| r.resolved_by.clone()),
            resolved_at: c.resolution.as_ref().map(|r| r.resolved_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStatsResponse {
    pub pending: u64,
    pub resolved: u64,
}

impl From<ConflictStats> for ConflictStatsResponse {
    fn from(s: ConflictStats) -> Self {
        Self {
            pending: s.pending,
            resolved: s.resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub memory_id: String,
    pub version_id: String,
    pub namespace: String,
    pub content: String,
    pub content_type: ContentType,
    pub score_at_decision: f64,
    pub breakdown: ScoreBreakdown,
}

impl From<MemorySnapshot> for SnapshotView {
    fn from(s: MemorySnapshot) -> Self {
        Self {
            memory_id: s.memory_id.0,
            version_id: s.version_id.0,
            namespace: s.namespace,
            content: s.content,
            content_type: s.content_type,
            score_at_decision: s.score_at_decision,
            breakdown: s.breakdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    pub id: String,
    pub agent_id: String,
    pub organization_id: String,
    pub input_query: String,
    pub output: String,
    pub confidence: f64,
    pub retrieved_memories: Vec<SnapshotView>,
    pub model_used: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    pub outcome_verified: bool,
    pub outcome_correct: Option<bool>,
    pub outcome_notes: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<DecisionRecord> for DecisionView {
    fn from(d: DecisionRecord) -> Self {
        Self {
            id: d.decision_id.0,
            agent_id: d.agent_id,
            organization_id: d.organization_id,
            input_query: d.input_query,
            output: d.output,
            confidence: d.confidence,
            retrieved_memories: d.retrieved_memories.into_iter().map(Into::into).collect(),
            model_used: d.model_used,
            latency_ms: d.latency_ms,
            created_at: d.created_at,
            outcome_verified: d.outcome_verified,
            outcome_correct: d.outcome_correct,
            outcome_notes: d.outcome_notes,
            verified_at: d.verified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionListResponse {
    pub decisions: Vec<DecisionView>,
    pub total: usize,
}

impl From<DecisionPage> for DecisionListResponse {
    fn from(page: DecisionPage) -> Self {
        Self {
            decisions: page.decisions.into_iter().map(Into::into).collect(),
            total: page.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub decision: DecisionView,
    pub historical_memories: Vec<HistoricalMemory>,
    pub analysis: ReplayAnalysis,
    pub analysis_digest: String,
    pub evaluated_at: DateTime<Utc>,
}

impl From<ReplayReport> for ReplayResponse {
    fn from(r: ReplayReport) -> Self {
        Self {
            decision: r.decision.into(),
            historical_memories: r.historical_memories,
            analysis: r.analysis,
            analysis_digest: r.analysis_digest,
            evaluated_at: r.evaluated_at,
        }
    }
}

/// Error body returned by the RPC layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}
