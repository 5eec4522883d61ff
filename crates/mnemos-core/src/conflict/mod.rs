//! Contradiction detection and resolution.
//!
//! Scans compare active memories of one namespace pairwise through an
//! injected [`ContradictionPredicate`]. Every contradicting pair maps onto
//! at most one pending [`ConflictRecord`]; the store enforces that, so
//! concurrent scans of the same state converge on the same record.

pub mod predicate;

use std::collections::BTreeMap;
use std::sync::Arc;

use mnemos_state::{
    ConflictFilter, ConflictId, ConflictPair, ConflictRecord, ConflictResolutionWrite,
    ConflictStats, Deprecation, DeprecationReason, Ledger, MemoryFilter, MemoryId, MemoryRecord,
    MemoryUpdate, Resolution, ResolutionAction, VersionRecord,
};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::domain::memory::{validate_content, validate_unit_interval};
use crate::domain::{Clock, EngineError, Result, ValidationError};
use crate::metrics::METRICS;
use crate::obs;

pub use predicate::{ContradictionPredicate, LexicalPredicate, PairAssessment};

/// What to do with a pending conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveAction {
    /// Both memories stay active.
    KeepBoth,
    /// `survivor` gets a new version with `merged_content`; the other
    /// memory is deprecated.
    Merge {
        survivor: MemoryId,
        merged_content: String,
    },
    /// `loser` is deprecated.
    DeprecateOne { loser: MemoryId },
}

impl ResolveAction {
    pub fn name(&self) -> &'static str {
        match self {
            ResolveAction::KeepBoth => "keep-both",
            ResolveAction::Merge { .. } => "merge",
            ResolveAction::DeprecateOne { .. } => "deprecate-one",
        }
    }

    fn persisted(&self) -> ResolutionAction {
        match self {
            ResolveAction::KeepBoth => ResolutionAction::KeepBoth,
            ResolveAction::Merge { survivor, .. } => ResolutionAction::Merge {
                survivor: survivor.clone(),
            },
            ResolveAction::DeprecateOne { loser } => ResolutionAction::DeprecateOne {
                loser: loser.clone(),
            },
        }
    }
}

/// An explicit confidence change applied as part of a resolution. This is
/// the only path through which confidence changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceAdjustment {
    pub memory_id: MemoryId,
    pub confidence: f64,
}

/// Finds and resolves contradictions between memories.
#[derive(Clone)]
pub struct ConflictDetector {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    predicate: Arc<dyn ContradictionPredicate>,
}

impl std::fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictDetector")
            .field("predicate", &self.predicate)
            .field("threshold", &self.config.conflicts.similarity_threshold)
            .finish()
    }
}

impl ConflictDetector {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        predicate: Arc<dyn ContradictionPredicate>,
    ) -> Self {
        Self {
            ledger,
            config,
            clock,
            predicate,
        }
    }

    /// Assess a pair in normalized order, so (A, B) and (B, A) always get
    /// the same answer.
    fn assess(&self, pair: &ConflictPair, a: &MemoryRecord, b: &MemoryRecord) -> PairAssessment {
        let (first, second) = if a.memory_id == pair.memory_a {
            (a, b)
        } else {
            (b, a)
        };
        self.predicate.assess(&first.content, &second.content)
    }

    /// Open (or reuse) the pending conflict for two contradicting memories.
    /// Returns `None` when the pair does not contradict or was already
    /// resolved and neither memory has changed since.
    async fn check_pair(
        &self,
        a: &MemoryRecord,
        b: &MemoryRecord,
    ) -> Result<Option<ConflictRecord>> {
        let Some(pair) = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()) else {
            return Ok(None);
        };
        let assessment = self.assess(&pair, a, b);
        if !assessment.contradicts(self.config.conflicts.similarity_threshold) {
            return Ok(None);
        }

        if let Some(latest) = self.ledger.latest_for_pair(&pair).await? {
            if let Some(resolution) = &latest.resolution {
                let changed_since = a.updated_at > resolution.resolved_at
                    || b.updated_at > resolution.resolved_at;
                if !changed_since {
                    debug!(conflict_id = %latest.conflict_id, "pair already resolved");
                    return Ok(None);
                }
            }
        }

        let (record, created) = self
            .ledger
            .open_conflict(pair, &a.namespace, self.clock.now())
            .await?;
        if created {
            METRICS.inc_conflicts_detected();
            obs::emit_conflict_detected(
                record.conflict_id.as_str(),
                record.pair.memory_a.as_str(),
                record.pair.memory_b.as_str(),
                assessment.similarity,
            );
        }
        Ok(Some(record))
    }

    /// Incremental scan: compare one memory with every other active memory
    /// in its namespace.
    #[instrument(skip(self, memory_id), fields(memory_id = %memory_id))]
    pub async fn scan(&self, memory_id: &MemoryId) -> Result<Vec<ConflictRecord>> {
        let memory = self.ledger.get_memory(memory_id).await?;
        if !memory.is_active() {
            return Ok(Vec::new());
        }
        let peers = self
            .ledger
            .list_memories(&MemoryFilter::active().in_namespace(&memory.namespace))
            .await?;

        let mut found = Vec::new();
        for peer in peers.iter().filter(|p| p.memory_id != memory.memory_id) {
            if let Some(record) = self.check_pair(&memory, peer).await? {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// Batch scan over every active pair in a namespace.
    #[instrument(skip(self))]
    pub async fn full_scan(&self, namespace: &str) -> Result<Vec<ConflictRecord>> {
        let memories = self
            .ledger
            .list_memories(&MemoryFilter::active().in_namespace(namespace))
            .await?;

        let mut found = Vec::new();
        for (i, a) in memories.iter().enumerate() {
            for b in &memories[i + 1..] {
                if let Some(record) = self.check_pair(a, b).await? {
                    found.push(record);
                }
            }
        }
        Ok(found)
    }

    /// Run an incremental scan in the background. Failures are logged;
    /// invariant violations at error level.
    pub fn spawn_scan(&self, memory_id: MemoryId) -> JoinHandle<()> {
        let detector = self.clone();
        tokio::spawn(async move {
            match detector.scan(&memory_id).await {
                Ok(_) => {}
                Err(e @ EngineError::InvariantViolation(_)) => {
                    obs::emit_invariant_violation("conflict.scan", memory_id.as_str(), &e);
                }
                Err(e) => obs::emit_scan_failed(memory_id.as_str(), &e),
            }
        })
    }

    pub async fn get(&self, conflict_id: &ConflictId) -> Result<ConflictRecord> {
        Ok(self.ledger.get_conflict(conflict_id).await?)
    }

    pub async fn list(&self, filter: &ConflictFilter) -> Result<Vec<ConflictRecord>> {
        Ok(self.ledger.list_conflicts(filter).await?)
    }

    pub async fn stats(&self) -> Result<ConflictStats> {
        Ok(self.ledger.conflict_stats().await?)
    }

    pub async fn resolve(
        &self,
        conflict_id: &ConflictId,
        action: ResolveAction,
        actor: &str,
    ) -> Result<ConflictRecord> {
        self.resolve_with_adjustments(conflict_id, action, Vec::new(), actor)
            .await
    }

    /// Resolve a pending conflict. The status transition, any deprecation,
    /// the merge version and the confidence adjustments commit together or
    /// not at all.
    #[instrument(skip(self, action, adjustments), fields(action = action.name()))]
    pub async fn resolve_with_adjustments(
        &self,
        conflict_id: &ConflictId,
        action: ResolveAction,
        adjustments: Vec<ConfidenceAdjustment>,
        actor: &str,
    ) -> Result<ConflictRecord> {
        if actor.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "actor" }.into());
        }
        let conflict = self.ledger.get_conflict(conflict_id).await?;
        if !conflict.is_pending() {
            return Err(EngineError::AlreadyResolved {
                conflict_id: conflict_id.to_string(),
            });
        }
        let pair = &conflict.pair;
        let now = self.clock.now();

        let mut touched: BTreeMap<MemoryId, (MemoryRecord, Option<VersionRecord>)> =
            BTreeMap::new();
        for id in [&pair.memory_a, &pair.memory_b] {
            let memory = self.ledger.get_memory(id).await?;
            touched.insert(id.clone(), (memory, None));
        }
        let mut dirty: Vec<MemoryId> = Vec::new();

        let deprecation = Deprecation {
            reason: DeprecationReason::ConflictResolution {
                conflict_id: conflict.conflict_id.clone(),
            },
            by: actor.to_string(),
            at: now,
        };

        let loser = match &action {
            ResolveAction::KeepBoth => None,
            ResolveAction::DeprecateOne { loser } => Some(member(pair, loser)?),
            ResolveAction::Merge {
                survivor,
                merged_content,
            } => {
                let survivor = member(pair, survivor)?;
                validate_content(merged_content, self.config.limits.max_content_bytes)?;
                let (memory, version) = touched
                    .get_mut(survivor)
                    .ok_or_else(|| missing_member(survivor))?;
                if !memory.is_active() {
                    return Err(ValidationError::DeprecatedMemory {
                        memory_id: survivor.to_string(),
                    }
                    .into());
                }
                let new_version = VersionRecord::new(
                    memory.memory_id.clone(),
                    Some(memory.current_version_id.clone()),
                    merged_content,
                    actor,
                    now,
                );
                memory.current_version_id = new_version.version_id.clone();
                memory.content = merged_content.clone();
                *version = Some(new_version);
                dirty.push(survivor.clone());
                pair.other(survivor)
            }
        };

        if let Some(loser) = loser {
            let (memory, _) = touched.get_mut(loser).ok_or_else(|| missing_member(loser))?;
            // Already inactive memories keep their original deprecation.
            if memory.is_active() {
                memory.deprecated = Some(deprecation.clone());
                dirty.push(loser.clone());
            }
        }

        let mut adjusted: Vec<&MemoryId> = Vec::new();
        for adjustment in &adjustments {
            let id = member(pair, &adjustment.memory_id)?;
            if adjusted.contains(&id) {
                return Err(ValidationError::InvalidResolution(format!(
                    "confidence of {id} adjusted more than once"
                ))
                .into());
            }
            adjusted.push(id);
            validate_unit_interval("confidence", adjustment.confidence)?;
            let (memory, _) = touched.get_mut(id).ok_or_else(|| missing_member(id))?;
            memory.confidence = adjustment.confidence;
            dirty.push(id.clone());
        }

        dirty.sort();
        dirty.dedup();
        let memory_updates: Vec<MemoryUpdate> = dirty
            .iter()
            .filter_map(|id| touched.remove(id))
            .map(|(mut memory, new_version)| {
                let expected_revision = memory.revision;
                memory.updated_at = now;
                MemoryUpdate {
                    memory,
                    expected_revision,
                    new_version,
                }
            })
            .collect();
        let merge_version = memory_updates
            .iter()
            .find_map(|u| u.new_version.clone());

        let resolved = self
            .ledger
            .resolve_conflict(ConflictResolutionWrite {
                conflict_id: conflict.conflict_id.clone(),
                expected_revision: conflict.revision,
                resolution: Resolution {
                    action: action.persisted(),
                    resolved_by: actor.to_string(),
                    resolved_at: now,
                },
                memory_updates,
            })
            .await?;

        if let Some(version) = merge_version {
            METRICS.inc_versions_committed();
            obs::emit_version_committed(
                version.memory_id.as_str(),
                version.version_id.as_str(),
                version.parent_version_id.as_ref().map(|v| v.as_str()),
                None,
            );
        }
        METRICS.inc_conflicts_resolved();
        obs::emit_conflict_resolved(resolved.conflict_id.as_str(), action.name(), actor);
        Ok(resolved)
    }
}

/// `id` as borrowed from the pair, or a validation error when it is not a
/// member.
fn member<'a>(pair: &'a ConflictPair, id: &MemoryId) -> Result<&'a MemoryId> {
    if &pair.memory_a == id {
        Ok(&pair.memory_a)
    } else if &pair.memory_b == id {
        Ok(&pair.memory_b)
    } else {
        Err(ValidationError::InvalidResolution(format!(
            "memory {id} is not part of conflict {}",
            pair.key()
        ))
        .into())
    }
}

fn missing_member(id: &MemoryId) -> EngineError {
    EngineError::InvariantViolation(format!("conflict member {id} was not loaded"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FixedClock;
    use chrono::{TimeZone, Utc};
    use mnemos_state::fakes::InMemoryLedger;
    use mnemos_state::{ContentType, MemoryMetadata, MemoryStore};

    fn memory(id: &str, namespace: &str, content: &str) -> (MemoryRecord, VersionRecord) {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let version = VersionRecord::new(id.into(), None, content, "alice", at);
        let record = MemoryRecord {
            memory_id: id.into(),
            namespace: namespace.to_string(),
            key: id.to_string(),
            content: content.to_string(),
            content_type: ContentType::Instruction,
            confidence: 0.9,
            usage_count: 0,
            metadata: MemoryMetadata::default(),
            created_at: at,
            created_by: "alice".to_string(),
            current_version_id: version.version_id.clone(),
            revision: 0,
            updated_at: at,
            deprecated: None,
        };
        (record, version)
    }

    async fn detector_with(memories: &[(&str, &str, &str)]) -> ConflictDetector {
        let ledger = Arc::new(InMemoryLedger::new());
        for (id, ns, content) in memories {
            let (m, v) = memory(id, ns, content);
            ledger.insert_memory(m, v).await.unwrap();
        }
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        ConflictDetector::new(
            ledger,
            Arc::new(EngineConfig::default()),
            Arc::new(clock),
            Arc::new(LexicalPredicate),
        )
    }

    #[tokio::test]
    async fn test_scan_only_compares_within_namespace() {
        let detector = detector_with(&[
            ("a", "ops", "Always deploy on Friday"),
            ("b", "ops", "Never deploy on Friday"),
            ("c", "hr", "Never deploy on Friday"),
        ])
        .await;
        let found = detector.scan(&"a".into()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pair.key(), "a|b");
        assert_eq!(found[0].namespace, "ops");
    }

    #[tokio::test]
    async fn test_resolution_rejects_foreign_memory() {
        let detector = detector_with(&[
            ("a", "ops", "Always deploy on Friday"),
            ("b", "ops", "Never deploy on Friday"),
        ])
        .await;
        let conflict = detector.scan(&"a".into()).await.unwrap().remove(0);
        let err = detector
            .resolve(
                &conflict.conflict_id,
                ResolveAction::DeprecateOne { loser: "zzz".into() },
                "bob",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidResolution(_))
        ));
        assert!(detector.get(&conflict.conflict_id).await.unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_merge_requires_non_empty_content() {
        let detector = detector_with(&[
            ("a", "ops", "Always deploy on Friday"),
            ("b", "ops", "Never deploy on Friday"),
        ])
        .await;
        let conflict = detector.scan(&"b".into()).await.unwrap().remove(0);
        let err = detector
            .resolve(
                &conflict.conflict_id,
                ResolveAction::Merge {
                    survivor: "a".into(),
                    merged_content: "  ".to_string(),
                },
                "bob",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
