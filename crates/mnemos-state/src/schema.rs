//! Schema definitions for Mnemos SurrealDB tables
//!
//! Tables:
//! - memories: Current state of every memory (never deleted)
//! - versions: Immutable content versions, parent-linked per memory
//! - conflicts: Contradiction records between memory pairs
//! - decisions: Append-only decision audit trail
//!
//! Row types convert to and from the `storage_traits` records at the
//! backend boundary; timestamps are stored as native SurrealDB datetimes so
//! `ORDER BY` works on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    ConflictId, ConflictPair, ConflictRecord, ConflictStatus, ContentType, DecisionId,
    DecisionRecord, Deprecation, MemoryId, MemoryMetadata, MemoryRecord, MemorySnapshot,
    Resolution, VersionId, VersionRecord,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in the `memories` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub memory_id: String,
    pub namespace: String,
    pub key: String,
    pub content: String,
    pub content_type: ContentType,
    pub confidence: f64,
    pub usage_count: u64,
    pub metadata: MemoryMetadata,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub current_version_id: String,
    pub revision: u64,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    /// Denormalized from `deprecated` for index-friendly filtering
    pub active: bool,
    pub deprecated: Option<Deprecation>,
}

impl From<MemoryRecord> for MemoryRow {
    fn from(m: MemoryRecord) -> Self {
        MemoryRow {
            active: m.is_active(),
            memory_id: m.memory_id.0,
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
        }
    }
}

impl From<MemoryRow> for MemoryRecord {
    fn from(row: MemoryRow) -> Self {
        MemoryRecord {
            memory_id: MemoryId(row.memory_id),
            namespace: row.namespace,
            key: row.key,
            content: row.content,
            content_type: row.content_type,
            confidence: row.confidence,
            usage_count: row.usage_count,
            metadata: row.metadata,
            created_at: row.created_at,
            created_by: row.created_by,
            current_version_id: VersionId(row.current_version_id),
            revision: row.revision,
            updated_at: row.updated_at,
            deprecated: row.deprecated,
        }
    }
}

/// Mutable columns of a memory row, written with `UPDATE ... MERGE`.
///
/// `usage_count` is deliberately absent: it only moves through atomic
/// increments when decisions are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPatch {
    pub content: String,
    pub confidence: f64,
    pub metadata: MemoryMetadata,
    pub current_version_id: String,
    pub revision: u64,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    pub deprecated: Option<Deprecation>,
}

impl MemoryPatch {
    /// Patch that moves `memory` to `revision`.
    pub fn new(memory: &MemoryRecord, revision: u64) -> Self {
        MemoryPatch {
            content: memory.content.clone(),
            confidence: memory.confidence,
            metadata: memory.metadata.clone(),
            current_version_id: memory.current_version_id.0.clone(),
            revision,
            updated_at: memory.updated_at,
            active: memory.is_active(),
            deprecated: memory.deprecated.clone(),
        }
    }
}

/// Row in the `versions` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRow {
    pub version_id: String,
    pub memory_id: String,
    pub parent_version_id: Option<String>,
    pub content: String,
    pub content_digest: String,
    pub edited_by: String,
    #[serde(with = "surreal_datetime")]
    pub edited_at: DateTime<Utc>,
    pub restored_from: Option<String>,
}

impl From<VersionRecord> for VersionRow {
    fn from(v: VersionRecord) -> Self {
        VersionRow {
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

impl From<VersionRow> for VersionRecord {
    fn from(row: VersionRow) -> Self {
        VersionRecord {
            version_id: VersionId(row.version_id),
            memory_id: MemoryId(row.memory_id),
            parent_version_id: row.parent_version_id.map(VersionId),
            content: row.content,
            content_digest: row.content_digest,
            edited_by: row.edited_by,
            edited_at: row.edited_at,
            restored_from: row.restored_from.map(VersionId),
        }
    }
}

/// Row in the `conflicts` table
///
/// `pending_key` equals `pair_key` while the conflict is pending and
/// `resolved:<conflict_id>` afterwards; a unique index on it enforces one
/// pending record per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRow {
    pub conflict_id: String,
    pub memory_a: String,
    pub memory_b: String,
    pub pair_key: String,
    pub pending_key: String,
    pub namespace: String,
    #[serde(with = "surreal_datetime")]
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolution: Option<Resolution>,
    pub revision: u64,
}

impl ConflictRow {
    pub fn pending_key_for(record: &ConflictRecord) -> String {
        if record.is_pending() {
            record.pair.key()
        } else {
            format!("resolved:{}", record.conflict_id)
        }
    }
}

impl From<ConflictRecord> for ConflictRow {
    fn from(c: ConflictRecord) -> Self {
        ConflictRow {
            pair_key: c.pair.key(),
            pending_key: ConflictRow::pending_key_for(&c),
            conflict_id: c.conflict_id.0,
            memory_a: c.pair.memory_a.0,
            memory_b: c.pair.memory_b.0,
            namespace: c.namespace,
            detected_at: c.detected_at,
            status: c.status,
            resolution: c.resolution,
            revision: c.revision,
        }
    }
}

impl From<ConflictRow> for ConflictRecord {
    fn from(row: ConflictRow) -> Self {
        ConflictRecord {
            conflict_id: ConflictId(row.conflict_id),
            pair: ConflictPair {
                memory_a: MemoryId(row.memory_a),
                memory_b: MemoryId(row.memory_b),
            },
            namespace: row.namespace,
            detected_at: row.detected_at,
            status: row.status,
            resolution: row.resolution,
            revision: row.revision,
        }
    }
}

/// Row in the `decisions` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRow {
    pub decision_id: String,
    pub agent_id: String,
    pub organization_id: String,
    pub input_query: String,
    pub output: String,
    pub confidence: f64,
    pub retrieved_memories: Vec<MemorySnapshot>,
    pub model_used: String,
    pub latency_ms: u64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    pub outcome_verified: bool,
    pub outcome_correct: Option<bool>,
    pub outcome_notes: Option<String>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<DecisionRecord> for DecisionRow {
    fn from(d: DecisionRecord) -> Self {
        DecisionRow {
            decision_id: d.decision_id.0,
            agent_id: d.agent_id,
            organization_id: d.organization_id,
            input_query: d.input_query,
            output: d.output,
            confidence: d.confidence,
            retrieved_memories: d.retrieved_memories,
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

impl From<DecisionRow> for DecisionRecord {
    fn from(row: DecisionRow) -> Self {
        DecisionRecord {
            decision_id: DecisionId(row.decision_id),
            agent_id: row.agent_id,
            organization_id: row.organization_id,
            input_query: row.input_query,
            output: row.output,
            confidence: row.confidence,
            retrieved_memories: row.retrieved_memories,
            model_used: row.model_used,
            latency_ms: row.latency_ms,
            created_at: row.created_at,
            outcome_verified: row.outcome_verified,
            outcome_correct: row.outcome_correct,
            outcome_notes: row.outcome_notes,
            verified_at: row.verified_at,
        }
    }
}
