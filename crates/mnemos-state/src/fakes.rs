//! In-memory fakes for storage traits (testing only)
//!
//! Provides `InMemoryLedger`, which satisfies all four storage traits
//! without any external dependencies. Every table lives behind one mutex,
//! so multi-row writes (version commits, resolutions, decisions with usage
//! increments) are atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    memories: HashMap<MemoryId, MemoryRecord>,
    versions: HashMap<VersionId, VersionRecord>,
    /// Insertion order of versions per memory
    version_order: HashMap<MemoryId, Vec<VersionId>>,
    conflicts: HashMap<ConflictId, ConflictRecord>,
    /// Pending-pair key -> conflict id
    pending_pairs: HashMap<String, ConflictId>,
    decisions: HashMap<DecisionId, DecisionRecord>,
}

impl Tables {
    fn memory(&self, id: &MemoryId) -> StorageResult<&MemoryRecord> {
        self.memories
            .get(id)
            .ok_or_else(|| StorageError::not_found("memory", id.as_str()))
    }

    /// Validate a memory update against the current table state without
    /// writing anything.
    fn check_update(&self, update: &MemoryUpdate) -> StorageResult<()> {
        let stored = self.memory(&update.memory.memory_id)?;
        if stored.revision != update.expected_revision {
            return Err(StorageError::RevisionMismatch {
                entity: "memory",
                id: stored.memory_id.to_string(),
                expected: update.expected_revision,
                actual: stored.revision,
            });
        }
        if let Some(version) = &update.new_version {
            if version.parent_version_id.as_ref() != Some(&stored.current_version_id) {
                return Err(StorageError::RevisionMismatch {
                    entity: "memory",
                    id: stored.memory_id.to_string(),
                    expected: update.expected_revision,
                    actual: stored.revision,
                });
            }
            if version.memory_id != stored.memory_id
                || update.memory.current_version_id != version.version_id
            {
                return Err(StorageError::InvalidRecord {
                    entity: "version",
                    reason: format!(
                        "version {} does not match memory {}",
                        version.version_id, stored.memory_id
                    ),
                });
            }
            if self.versions.contains_key(&version.version_id) {
                return Err(StorageError::Duplicate {
                    entity: "version",
                    key: version.version_id.to_string(),
                });
            }
        } else if update.memory.current_version_id != stored.current_version_id {
            return Err(StorageError::InvalidRecord {
                entity: "memory",
                reason: "current_version_id can only move with a new version".to_string(),
            });
        }
        Ok(())
    }

    /// Apply a previously checked update.
    fn apply_update(&mut self, update: MemoryUpdate) -> MemoryRecord {
        let mut memory = update.memory;
        memory.revision = update.expected_revision + 1;
        // Usage is only ever changed by decision inserts.
        if let Some(stored) = self.memories.get(&memory.memory_id) {
            memory.usage_count = stored.usage_count;
        }
        if let Some(version) = update.new_version {
            memory.content = version.content.clone();
            self.version_order
                .entry(memory.memory_id.clone())
                .or_default()
                .push(version.version_id.clone());
            self.versions.insert(version.version_id.clone(), version);
        }
        self.memories
            .insert(memory.memory_id.clone(), memory.clone());
        memory
    }
}

/// In-memory ledger backed by `HashMap`s behind a single `Mutex`.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: Mutex<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("in-memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl MemoryStore for InMemoryLedger {
    async fn insert_memory(
        &self,
        memory: MemoryRecord,
        initial_version: VersionRecord,
    ) -> StorageResult<()> {
        let mut tables = self.lock()?;
        if tables.memories.contains_key(&memory.memory_id) {
            return Err(StorageError::Duplicate {
                entity: "memory",
                key: memory.memory_id.to_string(),
            });
        }
        if tables
            .memories
            .values()
            .any(|m| m.namespace == memory.namespace && m.key == memory.key)
        {
            return Err(StorageError::Duplicate {
                entity: "memory",
                key: format!("{}/{}", memory.namespace, memory.key),
            });
        }
        if initial_version.parent_version_id.is_some()
            || initial_version.memory_id != memory.memory_id
            || memory.current_version_id != initial_version.version_id
        {
            return Err(StorageError::InvalidRecord {
                entity: "version",
                reason: "initial version must be parentless and current".to_string(),
            });
        }

        tables
            .version_order
            .entry(memory.memory_id.clone())
            .or_default()
            .push(initial_version.version_id.clone());
        tables
            .versions
            .insert(initial_version.version_id.clone(), initial_version);
        tables.memories.insert(memory.memory_id.clone(), memory);
        Ok(())
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<MemoryRecord> {
        let tables = self.lock()?;
        tables.memory(memory_id).cloned()
    }

    async fn find_by_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> StorageResult<Option<MemoryRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .memories
            .values()
            .find(|m| m.namespace == namespace && m.key == key)
            .cloned())
    }

    async fn list_memories(&self, filter: &MemoryFilter) -> StorageResult<Vec<MemoryRecord>> {
        let tables = self.lock()?;
        let mut rows: Vec<MemoryRecord> = tables
            .memories
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        Ok(rows)
    }

    async fn update_memory(
        &self,
        memory: MemoryRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord> {
        let mut tables = self.lock()?;
        let update = MemoryUpdate {
            memory,
            expected_revision,
            new_version: None,
        };
        tables.check_update(&update)?;
        Ok(tables.apply_update(update))
    }
}

#[async_trait]
impl VersionStore for InMemoryLedger {
    async fn commit_version(
        &self,
        version: VersionRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord> {
        let mut tables = self.lock()?;
        let mut memory = tables.memory(&version.memory_id)?.clone();
        memory.current_version_id = version.version_id.clone();
        memory.updated_at = version.edited_at;
        let update = MemoryUpdate {
            memory,
            expected_revision,
            new_version: Some(version),
        };
        tables.check_update(&update)?;
        Ok(tables.apply_update(update))
    }

    async fn get_version(&self, version_id: &VersionId) -> StorageResult<VersionRecord> {
        let tables = self.lock()?;
        tables
            .versions
            .get(version_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("version", version_id.as_str()))
    }

    async fn versions_for(&self, memory_id: &MemoryId) -> StorageResult<Vec<VersionRecord>> {
        let tables = self.lock()?;
        tables.memory(memory_id)?;
        Ok(tables
            .version_order
            .get(memory_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.versions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConflictStore for InMemoryLedger {
    async fn open_conflict(
        &self,
        pair: ConflictPair,
        namespace: &str,
        detected_at: DateTime<Utc>,
    ) -> StorageResult<(ConflictRecord, bool)> {
        let mut tables = self.lock()?;
        let key = pair.key();
        if let Some(existing) = tables
            .pending_pairs
            .get(&key)
            .and_then(|id| tables.conflicts.get(id))
        {
            return Ok((existing.clone(), false));
        }

        let record = ConflictRecord::pending(pair, namespace, detected_at);
        tables
            .pending_pairs
            .insert(key, record.conflict_id.clone());
        tables
            .conflicts
            .insert(record.conflict_id.clone(), record.clone());
        Ok((record, true))
    }

    async fn get_conflict(&self, conflict_id: &ConflictId) -> StorageResult<ConflictRecord> {
        let tables = self.lock()?;
        tables
            .conflicts
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("conflict", conflict_id.as_str()))
    }

    async fn latest_for_pair(&self, pair: &ConflictPair) -> StorageResult<Option<ConflictRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .conflicts
            .values()
            .filter(|c| &c.pair == pair)
            .max_by(|a, b| {
                a.detected_at
                    .cmp(&b.detected_at)
                    .then_with(|| a.conflict_id.cmp(&b.conflict_id))
            })
            .cloned())
    }

    async fn list_conflicts(&self, filter: &ConflictFilter) -> StorageResult<Vec<ConflictRecord>> {
        let tables = self.lock()?;
        let mut rows: Vec<ConflictRecord> = tables
            .conflicts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.conflict_id.cmp(&b.conflict_id))
        });
        Ok(rows)
    }

    async fn conflict_stats(&self) -> StorageResult<ConflictStats> {
        let tables = self.lock()?;
        let mut stats = ConflictStats::default();
        for c in tables.conflicts.values() {
            match c.status {
                ConflictStatus::Pending => stats.pending += 1,
                ConflictStatus::Resolved => stats.resolved += 1,
            }
        }
        Ok(stats)
    }

    async fn resolve_conflict(
        &self,
        write: ConflictResolutionWrite,
    ) -> StorageResult<ConflictRecord> {
        let mut tables = self.lock()?;
        let stored = tables
            .conflicts
            .get(&write.conflict_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("conflict", write.conflict_id.as_str()))?;

        if !stored.is_pending() {
            return Err(StorageError::AlreadyResolved {
                conflict_id: stored.conflict_id.to_string(),
            });
        }
        if stored.revision != write.expected_revision {
            return Err(StorageError::RevisionMismatch {
                entity: "conflict",
                id: stored.conflict_id.to_string(),
                expected: write.expected_revision,
                actual: stored.revision,
            });
        }
        // Check every memory write before applying any of them.
        for update in &write.memory_updates {
            tables.check_update(update)?;
        }

        for update in write.memory_updates {
            tables.apply_update(update);
        }
        let mut resolved = stored;
        resolved.status = ConflictStatus::Resolved;
        resolved.resolution = Some(write.resolution);
        resolved.revision += 1;
        tables.pending_pairs.remove(&resolved.pair.key());
        tables
            .conflicts
            .insert(resolved.conflict_id.clone(), resolved.clone());
        Ok(resolved)
    }
}

#[async_trait]
impl DecisionStore for InMemoryLedger {
    async fn insert_decision(&self, decision: DecisionRecord) -> StorageResult<()> {
        let mut tables = self.lock()?;
        if tables.decisions.contains_key(&decision.decision_id) {
            return Err(StorageError::Duplicate {
                entity: "decision",
                key: decision.decision_id.to_string(),
            });
        }
        for snap in &decision.retrieved_memories {
            tables.memory(&snap.memory_id)?;
        }

        for snap in &decision.retrieved_memories {
            if let Some(m) = tables.memories.get_mut(&snap.memory_id) {
                m.usage_count += 1;
            }
        }
        tables
            .decisions
            .insert(decision.decision_id.clone(), decision);
        Ok(())
    }

    async fn get_decision(&self, decision_id: &DecisionId) -> StorageResult<DecisionRecord> {
        let tables = self.lock()?;
        tables
            .decisions
            .get(decision_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("decision", decision_id.as_str()))
    }

    async fn list_decisions(&self, query: &DecisionQuery) -> StorageResult<DecisionPage> {
        let tables = self.lock()?;
        let mut rows: Vec<&DecisionRecord> = tables
            .decisions
            .values()
            .filter(|d| query.matches(d))
            .collect();
        // Newest first, id ascending on ties.
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.decision_id.cmp(&b.decision_id))
        });
        let total = rows.len();
        let decisions = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(DecisionPage { decisions, total })
    }

    async fn set_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: DecisionOutcome,
    ) -> StorageResult<DecisionRecord> {
        let mut tables = self.lock()?;
        let decision = tables
            .decisions
            .get_mut(decision_id)
            .ok_or_else(|| StorageError::not_found("decision", decision_id.as_str()))?;
        if decision.outcome_verified {
            return Err(StorageError::AlreadyVerified {
                decision_id: decision_id.to_string(),
            });
        }
        decision.outcome_verified = true;
        decision.outcome_correct = Some(outcome.correct);
        decision.outcome_notes = outcome.notes;
        decision.verified_at = Some(outcome.verified_at);
        Ok(decision.clone())
    }
}
