//! Structured observability hooks for memory lifecycle events.
//!
//! Every state transition the engine commits is announced here as one
//! `info!` event with a stable `event` field, so log pipelines can follow a
//! memory or a decision end to end:
//!
//! | event | emitted when |
//! |---|---|
//! | `memory.created` | a memory and its first version are stored |
//! | `memory.tombstoned` | a memory is soft-deleted |
//! | `version.committed` | an edit, rollback or merge appends a version |
//! | `conflict.detected` | a new pending conflict is opened |
//! | `conflict.resolved` | a pending conflict transitions to resolved |
//! | `decision.recorded` | a decision snapshot is appended |
//! | `decision.verified` | a decision outcome is set |
//! | `decision.replayed` | a replay report is produced |

use tracing::{error, info, warn};

/// RAII guard that enters an operation-scoped span.
///
/// ```ignore
/// let _span = OpSpan::enter("memory.edit", "m-123");
/// // tracing calls below carry op = "memory.edit", target_id = "m-123"
/// ```
pub struct OpSpan {
    _span: tracing::span::EnteredSpan,
}

impl OpSpan {
    pub fn enter(op: &str, target_id: &str) -> Self {
        let span = tracing::info_span!("mnemos.op", op = %op, target_id = %target_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_memory_created(memory_id: &str, namespace: &str, content_type: &str) {
    info!(
        event = "memory.created",
        memory_id = %memory_id,
        namespace = %namespace,
        content_type = %content_type,
    );
}

pub fn emit_memory_tombstoned(memory_id: &str, actor: &str) {
    info!(event = "memory.tombstoned", memory_id = %memory_id, actor = %actor);
}

/// `restored_from` is set when the version was produced by a rollback.
pub fn emit_version_committed(
    memory_id: &str,
    version_id: &str,
    parent_version_id: Option<&str>,
    restored_from: Option<&str>,
) {
    info!(
        event = "version.committed",
        memory_id = %memory_id,
        version_id = %version_id,
        parent_version_id = parent_version_id.unwrap_or(""),
        restored_from = restored_from.unwrap_or(""),
    );
}

pub fn emit_conflict_detected(conflict_id: &str, memory_a: &str, memory_b: &str, similarity: f64) {
    info!(
        event = "conflict.detected",
        conflict_id = %conflict_id,
        memory_a = %memory_a,
        memory_b = %memory_b,
        similarity = similarity,
    );
}

pub fn emit_conflict_resolved(conflict_id: &str, action: &str, actor: &str) {
    info!(
        event = "conflict.resolved",
        conflict_id = %conflict_id,
        action = %action,
        actor = %actor,
    );
}

pub fn emit_decision_recorded(decision_id: &str, agent_id: &str, memories: usize) {
    info!(
        event = "decision.recorded",
        decision_id = %decision_id,
        agent_id = %agent_id,
        memories = memories,
    );
}

pub fn emit_decision_verified(decision_id: &str, correct: bool) {
    info!(event = "decision.verified", decision_id = %decision_id, correct = correct);
}

pub fn emit_decision_replayed(decision_id: &str, removed: usize, drift: f64, digest: &str) {
    info!(
        event = "decision.replayed",
        decision_id = %decision_id,
        memories_removed = removed,
        context_drift_score = drift,
        analysis_digest = %digest,
    );
}

/// A concurrent modification is about to be retried (warning level).
pub fn emit_retry(op: &str, error: &dyn std::fmt::Display) {
    warn!(event = "engine.retry", op = %op, error = %error);
}

/// An invariant violation surfaced to the caller (error level).
pub fn emit_invariant_violation(op: &str, target: &str, error: &dyn std::fmt::Display) {
    error!(event = "engine.invariant_violation", op = %op, target = %target, error = %error);
}

/// A background conflict scan failed (warning level).
pub fn emit_scan_failed(memory_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "conflict.scan_failed", memory_id = %memory_id, error = %error);
}
