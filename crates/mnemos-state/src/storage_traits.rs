//! Storage trait definitions for Mnemos
//!
//! These traits define the four logical tables of the engine:
//! - `MemoryStore`: memory records (lookup, listing, tombstones)
//! - `VersionStore`: immutable version chain per memory
//! - `ConflictStore`: contradiction records and their resolution
//! - `DecisionStore`: append-only decision audit trail
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

record_id!(
    /// Unique identifier of a memory
    MemoryId
);
record_id!(
    /// Unique identifier of one immutable version of a memory
    VersionId
);
record_id!(
    /// Unique identifier of a conflict record
    ConflictId
);
record_id!(
    /// Unique identifier of a recorded decision
    DecisionId
);

// ---------------------------------------------------------------------------
// Memories
// ---------------------------------------------------------------------------

/// The kind of knowledge a memory holds. Drives the decay half-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Fact,
    Preference,
    Instruction,
    Observation,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Fact,
        ContentType::Preference,
        ContentType::Instruction,
        ContentType::Observation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Instruction => "instruction",
            Self::Observation => "observation",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "instruction" => Ok(Self::Instruction),
            "observation" => Ok(Self::Observation),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemorySource {
    Conversation { session_id: String },
    Document { uri: String },
    Agent { agent_id: String },
    Import { batch_id: String },
}

/// Structured metadata attached to a memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<MemorySource>,
}

/// Why a memory stopped being active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeprecationReason {
    /// Explicit soft delete
    Tombstoned,
    /// Lost a conflict resolution (deprecate-one or merge)
    ConflictResolution { conflict_id: ConflictId },
}

/// Soft-deprecation marker. Memories are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    pub reason: DeprecationReason,
    pub by: String,
    pub at: DateTime<Utc>,
}

/// A memory row.
///
/// `content` mirrors the content of `current_version_id`; it is rewritten
/// only through version commits. `revision` is the optimistic-lock counter
/// and is bumped on every write except usage increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: MemoryId,
    pub namespace: String,
    pub key: String,
    pub content: String,
    pub content_type: ContentType,
    pub confidence: f64,
    pub usage_count: u64,
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub current_version_id: VersionId,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    pub deprecated: Option<Deprecation>,
}

impl MemoryRecord {
    /// Not tombstoned and not deprecated by a conflict resolution.
    pub fn is_active(&self) -> bool {
        self.deprecated.is_none()
    }
}

/// Filter for listing memories.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub namespace: Option<String>,
    pub include_inactive: bool,
}

impl MemoryFilter {
    /// Active memories in every namespace.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn matches(&self, memory: &MemoryRecord) -> bool {
        if let Some(ns) = &self.namespace {
            if &memory.namespace != ns {
                return false;
            }
        }
        self.include_inactive || memory.is_active()
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// One immutable version of a memory's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: VersionId,
    pub memory_id: MemoryId,
    /// `None` only for the first version of a memory
    pub parent_version_id: Option<VersionId>,
    pub content: String,
    /// SHA-256 hex of `content`
    pub content_digest: String,
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
    /// Set when this version was produced by a rollback
    pub restored_from: Option<VersionId>,
}

impl VersionRecord {
    pub fn new(
        memory_id: MemoryId,
        parent_version_id: Option<VersionId>,
        content: &str,
        edited_by: &str,
        edited_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version_id: VersionId::new(),
            memory_id,
            parent_version_id,
            content: content.to_string(),
            content_digest: content_digest(content),
            edited_by: edited_by.to_string(),
            edited_at,
            restored_from: None,
        }
    }

    pub fn restored_from(mut self, version_id: VersionId) -> Self {
        self.restored_from = Some(version_id);
        self
    }
}

/// SHA-256 hex digest of a content string.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// A compare-and-swap write of one memory row.
///
/// `memory` is the complete new state. When `new_version` is present it is
/// appended to the chain and must be the version `memory.current_version_id`
/// points at, with the stored current version as its parent.
#[derive(Debug, Clone)]
pub struct MemoryUpdate {
    pub memory: MemoryRecord,
    pub expected_revision: u64,
    pub new_version: Option<VersionRecord>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Unordered pair of memory ids, stored in normalized (sorted) order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictPair {
    pub memory_a: MemoryId,
    pub memory_b: MemoryId,
}

impl ConflictPair {
    /// Normalize two ids into a pair. Returns `None` for a self-pair.
    pub fn new(x: MemoryId, y: MemoryId) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self {
                memory_a: x,
                memory_b: y,
            }),
            std::cmp::Ordering::Greater => Some(Self {
                memory_a: y,
                memory_b: x,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Stable key used for the pending-uniqueness constraint.
    pub fn key(&self) -> String {
        format!("{}|{}", self.memory_a, self.memory_b)
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        &self.memory_a == id || &self.memory_b == id
    }

    /// The other member of the pair, if `id` is a member.
    pub fn other(&self, id: &MemoryId) -> Option<&MemoryId> {
        if &self.memory_a == id {
            Some(&self.memory_b)
        } else if &self.memory_b == id {
            Some(&self.memory_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// The persisted resolution action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ResolutionAction {
    KeepBoth,
    Merge { survivor: MemoryId },
    DeprecateOne { loser: MemoryId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

/// A detected contradiction between two memories of one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: ConflictId,
    pub pair: ConflictPair,
    pub namespace: String,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolution: Option<Resolution>,
    pub revision: u64,
}

impl ConflictRecord {
    pub fn pending(pair: ConflictPair, namespace: &str, detected_at: DateTime<Utc>) -> Self {
        Self {
            conflict_id: ConflictId::new(),
            pair,
            namespace: namespace.to_string(),
            detected_at,
            status: ConflictStatus::Pending,
            resolution: None,
            revision: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

/// An atomic conflict resolution: the status transition plus every memory
/// write it implies.
#[derive(Debug, Clone)]
pub struct ConflictResolutionWrite {
    pub conflict_id: ConflictId,
    pub expected_revision: u64,
    pub resolution: Resolution,
    pub memory_updates: Vec<MemoryUpdate>,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    pub status: Option<ConflictStatus>,
    pub namespace: Option<String>,
    pub memory_id: Option<MemoryId>,
}

impl ConflictFilter {
    pub fn matches(&self, conflict: &ConflictRecord) -> bool {
        if let Some(status) = self.status {
            if conflict.status != status {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if &conflict.namespace != ns {
                return false;
            }
        }
        if let Some(id) = &self.memory_id {
            if !conflict.pair.contains(id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub pending: u64,
    pub resolved: u64,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Score components of a memory at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub total_score: f64,
    pub base_score: f64,
    pub time_decay: f64,
    pub usage_boost: f64,
}

/// A retrieved memory, captured by value at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub memory_id: MemoryId,
    pub version_id: VersionId,
    pub namespace: String,
    pub content: String,
    pub content_type: ContentType,
    pub score_at_decision: f64,
    pub breakdown: ScoreBreakdown,
}

/// An immutable record of one agent answer and the memories behind it.
///
/// Only the `outcome_*`/`verified_at` fields change after creation, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: DecisionId,
    pub agent_id: String,
    pub organization_id: String,
    pub input_query: String,
    pub output: String,
    pub confidence: f64,
    pub retrieved_memories: Vec<MemorySnapshot>,
    pub model_used: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    pub outcome_verified: bool,
    pub outcome_correct: Option<bool>,
    pub outcome_notes: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Outcome written by a verification action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub correct: bool,
    pub notes: Option<String>,
    pub verified_at: DateTime<Utc>,
}

/// Conjunctive filter for listing decisions.
#[derive(Debug, Clone)]
pub struct DecisionQuery {
    pub organization_id: String,
    pub agent_id: Option<String>,
    pub verified: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

impl DecisionQuery {
    pub fn for_org(organization_id: &str) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            agent_id: None,
            verified: None,
            limit: 20,
            offset: 0,
        }
    }

    pub fn with_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, decision: &DecisionRecord) -> bool {
        decision.organization_id == self.organization_id
            && self
                .agent_id
                .as_ref()
                .map_or(true, |a| &decision.agent_id == a)
            && self
                .verified
                .map_or(true, |v| decision.outcome_verified == v)
    }
}

/// One page of decisions plus the total number of matches.
#[derive(Debug, Clone)]
pub struct DecisionPage {
    pub decisions: Vec<DecisionRecord>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Durable storage and lookup of memory records.
///
/// Guarantees:
/// - `(namespace, key)` is unique.
/// - `update_memory` is a compare-and-swap on `revision`.
/// - Rows are never deleted.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new memory together with its first version (atomic).
    async fn insert_memory(
        &self,
        memory: MemoryRecord,
        initial_version: VersionRecord,
    ) -> StorageResult<()>;

    /// Fetch a memory. `StorageError::NotFound` if absent.
    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<MemoryRecord>;

    /// Look a memory up by its namespaced key.
    async fn find_by_key(&self, namespace: &str, key: &str)
        -> StorageResult<Option<MemoryRecord>>;

    /// List memories ordered by `(created_at, memory_id)`.
    async fn list_memories(&self, filter: &MemoryFilter) -> StorageResult<Vec<MemoryRecord>>;

    /// Replace a memory if its stored revision equals `expected_revision`.
    /// Returns the stored row with the bumped revision.
    async fn update_memory(
        &self,
        memory: MemoryRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord>;
}

/// Immutable version chain per memory.
///
/// Guarantees:
/// - Versions are never modified after insertion.
/// - `commit_version` inserts the version and repoints the memory in one step,
///   and only if the memory is still at `expected_revision` and the version's
///   parent is the memory's current version.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn commit_version(
        &self,
        version: VersionRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord>;

    async fn get_version(&self, version_id: &VersionId) -> StorageResult<VersionRecord>;

    /// All versions of a memory, oldest first.
    async fn versions_for(&self, memory_id: &MemoryId) -> StorageResult<Vec<VersionRecord>>;
}

/// Contradiction records.
///
/// Guarantees:
/// - At most one pending record per unordered pair.
/// - Resolution is a single atomic transition; resolved records never reopen.
#[async_trait]
pub trait ConflictStore: Send + Sync {
    /// Return the pending record for `pair`, creating it if none exists.
    /// The boolean is `true` when a new record was created.
    async fn open_conflict(
        &self,
        pair: ConflictPair,
        namespace: &str,
        detected_at: DateTime<Utc>,
    ) -> StorageResult<(ConflictRecord, bool)>;

    async fn get_conflict(&self, conflict_id: &ConflictId) -> StorageResult<ConflictRecord>;

    /// Most recently detected record for a pair, pending or resolved.
    async fn latest_for_pair(&self, pair: &ConflictPair) -> StorageResult<Option<ConflictRecord>>;

    /// List conflicts ordered by `(detected_at, conflict_id)`.
    async fn list_conflicts(&self, filter: &ConflictFilter) -> StorageResult<Vec<ConflictRecord>>;

    async fn conflict_stats(&self) -> StorageResult<ConflictStats>;

    /// Apply a resolution and its memory writes atomically.
    async fn resolve_conflict(&self, write: ConflictResolutionWrite)
        -> StorageResult<ConflictRecord>;
}

/// Append-only decision audit trail.
///
/// Guarantees:
/// - `insert_decision` also increments `usage_count` of every referenced
///   memory; either everything is written or nothing is.
/// - `set_outcome` succeeds at most once per decision.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn insert_decision(&self, decision: DecisionRecord) -> StorageResult<()>;

    async fn get_decision(&self, decision_id: &DecisionId) -> StorageResult<DecisionRecord>;

    /// Matching decisions, newest first, paginated.
    async fn list_decisions(&self, query: &DecisionQuery) -> StorageResult<DecisionPage>;

    async fn set_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: DecisionOutcome,
    ) -> StorageResult<DecisionRecord>;
}

/// Everything the engine needs from a backend.
pub trait Ledger: MemoryStore + VersionStore + ConflictStore + DecisionStore {}

impl<T> Ledger for T where T: MemoryStore + VersionStore + ConflictStore + DecisionStore {}
