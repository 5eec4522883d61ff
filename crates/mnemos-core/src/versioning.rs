//! Version chains.
//!
//! Every edit appends an immutable [`VersionRecord`] whose parent is the
//! memory's current version, and repoints the memory in the same store
//! write. Versions are kept in an arena keyed by id with explicit parent
//! pointers; [`VersionHistory`] walks that arena from the current pointer
//! and refuses to return a chain that revisits itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mnemos_state::{Ledger, MemoryId, MemoryRecord, VersionId, VersionRecord};
use tracing::instrument;

use crate::config::EngineConfig;
use crate::domain::memory::{require_non_empty, validate_content};
use crate::domain::{Clock, EngineError, Result, ValidationError};
use crate::metrics::METRICS;
use crate::obs;

/// The version chain of one memory, most recent first.
///
/// Iteration is finite and restartable: every call to [`iter`](Self::iter)
/// starts again from the current version.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    memory_id: MemoryId,
    arena: HashMap<VersionId, VersionRecord>,
    chain: Vec<VersionId>,
}

impl VersionHistory {
    /// Walk `versions` from `head` along parent pointers.
    pub fn build(memory_id: &MemoryId, head: &VersionId, versions: Vec<VersionRecord>) -> Result<Self> {
        let arena: HashMap<VersionId, VersionRecord> = versions
            .into_iter()
            .map(|v| (v.version_id.clone(), v))
            .collect();

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(head.clone());
        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                return Err(EngineError::InvariantViolation(format!(
                    "version chain of memory {memory_id} revisits {id}"
                )));
            }
            let version = arena.get(&id).ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "version chain of memory {memory_id} points at missing version {id}"
                ))
            })?;
            if &version.memory_id != memory_id {
                return Err(EngineError::InvariantViolation(format!(
                    "version {id} in chain of memory {memory_id} belongs to {}",
                    version.memory_id
                )));
            }
            cursor = version.parent_version_id.clone();
            chain.push(id);
        }

        Ok(Self {
            memory_id: memory_id.clone(),
            arena,
            chain,
        })
    }

    pub fn memory_id(&self) -> &MemoryId {
        &self.memory_id
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionRecord> + '_ {
        self.chain.iter().filter_map(|id| self.arena.get(id))
    }

    pub fn current(&self) -> Option<&VersionRecord> {
        self.iter().next()
    }

    /// The first version, the one without a parent.
    pub fn root(&self) -> Option<&VersionRecord> {
        self.chain.last().and_then(|id| self.arena.get(id))
    }

    pub fn get(&self, version_id: &VersionId) -> Option<&VersionRecord> {
        self.arena.get(version_id)
    }

    pub fn contains(&self, version_id: &VersionId) -> bool {
        self.arena.contains_key(version_id)
    }

    pub fn to_vec(&self) -> Vec<VersionRecord> {
        self.iter().cloned().collect()
    }
}

/// Edits, rollbacks and history of memory content.
#[derive(Clone)]
pub struct VersionManager {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl VersionManager {
    pub fn new(ledger: Arc<dyn Ledger>, config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            config,
            clock,
        }
    }

    async fn editable(&self, memory_id: &MemoryId) -> Result<MemoryRecord> {
        let memory = self.ledger.get_memory(memory_id).await?;
        if !memory.is_active() {
            return Err(ValidationError::DeprecatedMemory {
                memory_id: memory_id.to_string(),
            }
            .into());
        }
        Ok(memory)
    }

    async fn commit(&self, memory: &MemoryRecord, version: VersionRecord) -> Result<VersionRecord> {
        self.ledger
            .commit_version(version.clone(), memory.revision)
            .await?;
        METRICS.inc_versions_committed();
        obs::emit_version_committed(
            version.memory_id.as_str(),
            version.version_id.as_str(),
            version.parent_version_id.as_ref().map(|v| v.as_str()),
            version.restored_from.as_ref().map(|v| v.as_str()),
        );
        Ok(version)
    }

    /// Append a version on top of whatever is current when the call runs.
    #[instrument(skip(self, content))]
    pub async fn create_version(
        &self,
        memory_id: &MemoryId,
        content: &str,
        editor: &str,
    ) -> Result<VersionRecord> {
        require_non_empty("editor", editor)?;
        validate_content(content, self.config.limits.max_content_bytes)?;
        let memory = self.editable(memory_id).await?;
        let version = VersionRecord::new(
            memory.memory_id.clone(),
            Some(memory.current_version_id.clone()),
            content,
            editor,
            self.clock.now(),
        );
        self.commit(&memory, version).await
    }

    /// Append a version built on `base_version_id`. Fails with
    /// `ConcurrentModification` when another edit has moved the memory past
    /// that base.
    #[instrument(skip(self, content))]
    pub async fn create_version_from(
        &self,
        memory_id: &MemoryId,
        base_version_id: &VersionId,
        content: &str,
        editor: &str,
    ) -> Result<VersionRecord> {
        require_non_empty("editor", editor)?;
        validate_content(content, self.config.limits.max_content_bytes)?;
        let base = self.own_version(memory_id, base_version_id).await?;
        let memory = self.editable(memory_id).await?;
        if memory.current_version_id != base.version_id {
            return Err(EngineError::ConcurrentModification {
                entity: "memory",
                id: memory_id.to_string(),
            });
        }
        let version = VersionRecord::new(
            memory.memory_id.clone(),
            Some(base.version_id),
            content,
            editor,
            self.clock.now(),
        );
        self.commit(&memory, version).await
    }

    /// Append a version whose content copies `to_version_id`. History only
    /// ever grows.
    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        memory_id: &MemoryId,
        to_version_id: &VersionId,
        editor: &str,
    ) -> Result<VersionRecord> {
        require_non_empty("editor", editor)?;
        let target = self.own_version(memory_id, to_version_id).await?;
        let memory = self.editable(memory_id).await?;
        let version = VersionRecord::new(
            memory.memory_id.clone(),
            Some(memory.current_version_id.clone()),
            &target.content,
            editor,
            self.clock.now(),
        )
        .restored_from(target.version_id);
        self.commit(&memory, version).await
    }

    #[instrument(skip(self))]
    pub async fn history(&self, memory_id: &MemoryId) -> Result<VersionHistory> {
        let memory = self.ledger.get_memory(memory_id).await?;
        let versions = self.ledger.versions_for(memory_id).await?;
        VersionHistory::build(memory_id, &memory.current_version_id, versions)
    }

    pub async fn get_version(&self, version_id: &VersionId) -> Result<VersionRecord> {
        Ok(self.ledger.get_version(version_id).await?)
    }

    /// Fetch a version and check that it belongs to `memory_id`.
    async fn own_version(&self, memory_id: &MemoryId, version_id: &VersionId) -> Result<VersionRecord> {
        let version = self.ledger.get_version(version_id).await?;
        if &version.memory_id != memory_id {
            return Err(ValidationError::ForeignVersion {
                memory_id: memory_id.to_string(),
                version_id: version_id.to_string(),
            }
            .into());
        }
        Ok(version)
    }
}
