//! SurrealDB-backed Ledger implementation
//!
//! Uses the `schema` row types for persistence, converting to/from
//! `storage_traits` types at the boundary.
//!
//! Multi-row writes (version commits, conflict resolutions, decisions with
//! usage increments, outcome verification) run inside a single
//! `BEGIN/COMMIT TRANSACTION` block. Guards inside the block `THROW` a
//! `mnemos-abort:<kind>:<target>:<index>` message, which aborts the whole
//! transaction and is mapped back onto [`StorageError`] here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::handle::SurrealHandle;
use crate::schema::{ConflictRow, DecisionRow, MemoryPatch, MemoryRow, VersionRow};
use crate::storage_traits::*;

const ABORT_MARKER: &str = "mnemos-abort:";

/// Attempts at opening a conflict before giving up on a contended pair.
const OPEN_CONFLICT_ATTEMPTS: usize = 3;

/// Optimistic write conflict between two transactions.
fn is_write_conflict(msg: &str) -> bool {
    msg.contains("can be retried")
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, PartialEq)]
enum Abort {
    NotFound { target: String, index: usize },
    RevisionMismatch { target: String, index: usize },
    InvalidPointer { index: usize },
    AlreadyResolved,
    AlreadyVerified,
    /// Unique index violation
    Index(String),
    Other(String),
}

impl Abort {
    fn parse(messages: &[String]) -> Self {
        for msg in messages {
            let Some(pos) = msg.find(ABORT_MARKER) else {
                continue;
            };
            let mut parts = msg[pos + ABORT_MARKER.len()..].split(':');
            let kind = parts.next().unwrap_or_default();
            let target = parts.next().unwrap_or_default().to_string();
            let index = parts
                .next()
                .map(|s| s.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
                .and_then(|digits| digits.parse().ok())
                .unwrap_or(0);
            match kind {
                "not_found" => return Abort::NotFound { target, index },
                "revision_mismatch" => return Abort::RevisionMismatch { target, index },
                "invalid_pointer" => return Abort::InvalidPointer { index },
                "already_resolved" => return Abort::AlreadyResolved,
                "already_verified" => return Abort::AlreadyVerified,
                _ => {}
            }
        }
        if let Some(msg) = messages.iter().find(|m| m.contains("already contains")) {
            return Abort::Index(msg.clone());
        }
        Abort::Other(messages.join("; "))
    }
}

/// Drain statement errors from a response. In a failed transaction every
/// statement reports an error; the guard's message is among them.
fn take_abort(response: &mut surrealdb::Response) -> Option<Abort> {
    let errors = response.take_errors();
    if errors.is_empty() {
        return None;
    }
    let mut indexed: Vec<(usize, String)> = errors
        .into_iter()
        .map(|(i, e)| (i, e.to_string()))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    let messages: Vec<String> = indexed.into_iter().map(|(_, m)| m).collect();
    Some(Abort::parse(&messages))
}

/// What a transaction touched, used to turn an [`Abort`] into a
/// [`StorageError`] naming the right row.
#[derive(Debug, Default)]
struct TxContext {
    /// `(memory_id, expected_revision)` by statement index
    memories: Vec<(MemoryId, u64)>,
    versions: Vec<VersionId>,
    conflict: Option<(ConflictId, u64)>,
    decision: Option<DecisionId>,
    memory_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConflictPatch {
    status: ConflictStatus,
    resolution: Option<Resolution>,
    revision: u64,
    pending_key: String,
}

#[derive(Debug, Deserialize)]
struct StatusCount {
    status: ConflictStatus,
    n: u64,
}

#[derive(Debug, Deserialize)]
struct Count {
    n: u64,
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

/// Append the guarded write of update `i` to a transaction body.
///
/// Expects `$mid{i}`, `$exp{i}` and `$patch{i}` to be bound, plus
/// `$parent{i}` and `$version{i}` when `with_version` is set.
fn push_memory_update(sql: &mut String, i: usize, with_version: bool) {
    sql.push_str(&format!(
        "LET $cur{i} = (SELECT revision, current_version_id FROM memories WHERE memory_id = $mid{i});\n\
         IF array::len($cur{i}) = 0 {{ THROW \"{ABORT_MARKER}not_found:memory:{i}\" }};\n\
         IF $cur{i}[0].revision != $exp{i} {{ THROW \"{ABORT_MARKER}revision_mismatch:memory:{i}\" }};\n"
    ));
    if with_version {
        sql.push_str(&format!(
            "IF $cur{i}[0].current_version_id != $parent{i} {{ THROW \"{ABORT_MARKER}revision_mismatch:memory:{i}\" }};\n\
             CREATE versions CONTENT $version{i};\n"
        ));
    } else {
        sql.push_str(&format!(
            "IF $cur{i}[0].current_version_id != $patch{i}.current_version_id {{ THROW \"{ABORT_MARKER}invalid_pointer:memory:{i}\" }};\n"
        ));
    }
    sql.push_str(&format!(
        "UPDATE memories MERGE $patch{i} WHERE memory_id = $mid{i};\n"
    ));
}

/// Reject updates whose version does not belong to the memory it moves.
fn validate_update(update: &MemoryUpdate) -> StorageResult<()> {
    if let Some(version) = &update.new_version {
        if version.memory_id != update.memory.memory_id
            || update.memory.current_version_id != version.version_id
        {
            return Err(StorageError::InvalidRecord {
                entity: "version",
                reason: format!(
                    "version {} does not match memory {}",
                    version.version_id, update.memory.memory_id
                ),
            });
        }
        if version.parent_version_id.is_none() {
            return Err(StorageError::InvalidRecord {
                entity: "version",
                reason: "only the initial version may be parentless".to_string(),
            });
        }
    }
    Ok(())
}

/// SurrealDB-backed implementation of [`Ledger`].
#[derive(Clone)]
pub struct SurrealLedger {
    handle: SurrealHandle,
}

impl SurrealLedger {
    /// Wrap an already-connected handle.
    pub fn from_handle(handle: SurrealHandle) -> Self {
        Self { handle }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let handle = SurrealHandle::setup_db().await?;
        info!("SurrealLedger connected (in-memory)");
        Ok(Self::from_handle(handle))
    }

    /// Create from environment variables.
    ///
    /// Uses the same env-var chain as [`SurrealHandle::setup_from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Ok(Self::from_handle(SurrealHandle::setup_from_env().await?))
    }

    pub fn handle(&self) -> &SurrealHandle {
        &self.handle
    }

    fn db(&self) -> &Surreal<Any> {
        self.handle.db()
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_memory(&self, memory_id: &str) -> StorageResult<Option<MemoryRow>> {
        let mut res = self
            .db()
            .query("SELECT * FROM memories WHERE memory_id = $mid")
            .bind(("mid", memory_id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_conflict(&self, conflict_id: &str) -> StorageResult<Option<ConflictRow>> {
        let mut res = self
            .db()
            .query("SELECT * FROM conflicts WHERE conflict_id = $cid")
            .bind(("cid", conflict_id.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<ConflictRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn pending_for_key(&self, pair_key: &str) -> StorageResult<Option<ConflictRecord>> {
        let mut res = self
            .db()
            .query("SELECT * FROM conflicts WHERE pending_key = $key")
            .bind(("key", pair_key.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<ConflictRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(ConflictRecord::from))
    }

    async fn current_revision(&self, memory_id: &MemoryId, fallback: u64) -> u64 {
        match self.fetch_memory(memory_id.as_str()).await {
            Ok(Some(row)) => row.revision,
            _ => fallback,
        }
    }

    /// Translate an aborted transaction into the matching storage error.
    async fn abort_error(&self, abort: Abort, ctx: &TxContext) -> StorageError {
        match abort {
            Abort::NotFound { target, index } => {
                let missing = match target.as_str() {
                    "memory" => ctx
                        .memories
                        .get(index)
                        .map(|(id, _)| StorageError::not_found("memory", id.as_str())),
                    "conflict" => ctx
                        .conflict
                        .as_ref()
                        .map(|(id, _)| StorageError::not_found("conflict", id.as_str())),
                    "decision" => ctx
                        .decision
                        .as_ref()
                        .map(|id| StorageError::not_found("decision", id.as_str())),
                    _ => None,
                };
                missing.unwrap_or_else(|| {
                    StorageError::Backend(format!("unexpected abort target: {target}"))
                })
            }
            Abort::RevisionMismatch { target, index } => match target.as_str() {
                "memory" => match ctx.memories.get(index) {
                    Some((id, expected)) => StorageError::RevisionMismatch {
                        entity: "memory",
                        id: id.to_string(),
                        expected: *expected,
                        actual: self.current_revision(id, *expected).await,
                    },
                    None => StorageError::Backend("revision mismatch on unknown memory".into()),
                },
                "conflict" => match &ctx.conflict {
                    Some((id, expected)) => {
                        let actual = match self.fetch_conflict(id.as_str()).await {
                            Ok(Some(row)) => row.revision,
                            _ => *expected,
                        };
                        StorageError::RevisionMismatch {
                            entity: "conflict",
                            id: id.to_string(),
                            expected: *expected,
                            actual,
                        }
                    }
                    None => StorageError::Backend("revision mismatch on unknown conflict".into()),
                },
                other => StorageError::Backend(format!("unexpected abort target: {other}")),
            },
            Abort::InvalidPointer { index } => StorageError::InvalidRecord {
                entity: "memory",
                reason: format!(
                    "current_version_id of {} can only move with a new version",
                    ctx.memories
                        .get(index)
                        .map(|(id, _)| id.to_string())
                        .unwrap_or_default()
                ),
            },
            Abort::AlreadyResolved => StorageError::AlreadyResolved {
                conflict_id: ctx
                    .conflict
                    .as_ref()
                    .map(|(id, _)| id.to_string())
                    .unwrap_or_default(),
            },
            Abort::AlreadyVerified => StorageError::AlreadyVerified {
                decision_id: ctx
                    .decision
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            },
            Abort::Index(msg) => {
                let first_memory = ctx.memories.first().map(|(id, _)| id.to_string());
                let (entity, key) = if msg.contains("idx_namespace_key") {
                    ("memory", ctx.memory_key.clone())
                } else if msg.contains("idx_memory_id") {
                    ("memory", first_memory)
                } else if msg.contains("idx_version_id") {
                    ("version", ctx.versions.first().map(|v| v.to_string()))
                } else if msg.contains("idx_decision_id") {
                    ("decision", ctx.decision.as_ref().map(|d| d.to_string()))
                } else {
                    ("conflict", ctx.conflict.as_ref().map(|(c, _)| c.to_string()))
                };
                StorageError::Duplicate {
                    entity,
                    key: key.unwrap_or(msg),
                }
            }
            Abort::Other(msg) => StorageError::Backend(msg),
        }
    }

    /// Run guarded memory updates, optionally preceded by a conflict guard
    /// and followed by a conflict patch, as one transaction.
    async fn apply_updates(
        &self,
        updates: Vec<MemoryUpdate>,
        conflict: Option<(ConflictId, u64, ConflictPatch)>,
    ) -> StorageResult<()> {
        for update in &updates {
            validate_update(update)?;
        }

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        if conflict.is_some() {
            sql.push_str(&format!(
                "LET $conflict = (SELECT status, revision FROM conflicts WHERE conflict_id = $cid);\n\
                 IF array::len($conflict) = 0 {{ THROW \"{ABORT_MARKER}not_found:conflict:0\" }};\n\
                 IF $conflict[0].status != \"pending\" {{ THROW \"{ABORT_MARKER}already_resolved:conflict:0\" }};\n\
                 IF $conflict[0].revision != $cexp {{ THROW \"{ABORT_MARKER}revision_mismatch:conflict:0\" }};\n"
            ));
        }
        for (i, update) in updates.iter().enumerate() {
            push_memory_update(&mut sql, i, update.new_version.is_some());
        }
        if conflict.is_some() {
            sql.push_str("UPDATE conflicts MERGE $cpatch WHERE conflict_id = $cid;\n");
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut ctx = TxContext::default();
        let mut query = self.db().query(sql);
        if let Some((conflict_id, expected, patch)) = conflict {
            query = query
                .bind(("cid", conflict_id.0.clone()))
                .bind(("cexp", expected))
                .bind(("cpatch", patch));
            ctx.conflict = Some((conflict_id, expected));
        }
        for (i, update) in updates.into_iter().enumerate() {
            let mut patch = MemoryPatch::new(&update.memory, update.expected_revision + 1);
            ctx.memories
                .push((update.memory.memory_id.clone(), update.expected_revision));
            query = query
                .bind((format!("mid{i}"), update.memory.memory_id.0.clone()))
                .bind((format!("exp{i}"), update.expected_revision));
            if let Some(version) = update.new_version {
                patch.content = version.content.clone();
                let parent = version
                    .parent_version_id
                    .as_ref()
                    .map(|p| p.0.clone())
                    .unwrap_or_default();
                ctx.versions.push(version.version_id.clone());
                query = query
                    .bind((format!("parent{i}"), parent))
                    .bind((format!("version{i}"), VersionRow::from(version)));
            }
            query = query.bind((format!("patch{i}"), patch));
        }

        let mut response = query.await.map_err(backend)?;
        match take_abort(&mut response) {
            None => Ok(()),
            Some(abort) => Err(self.abort_error(abort, &ctx).await),
        }
    }
}

#[async_trait]
impl MemoryStore for SurrealLedger {
    #[instrument(skip_all, fields(memory_id = %memory.memory_id))]
    async fn insert_memory(
        &self,
        memory: MemoryRecord,
        initial_version: VersionRecord,
    ) -> StorageResult<()> {
        if initial_version.parent_version_id.is_some()
            || initial_version.memory_id != memory.memory_id
            || memory.current_version_id != initial_version.version_id
        {
            return Err(StorageError::InvalidRecord {
                entity: "version",
                reason: "initial version must be parentless and current".to_string(),
            });
        }

        let ctx = TxContext {
            memories: vec![(memory.memory_id.clone(), memory.revision)],
            versions: vec![initial_version.version_id.clone()],
            memory_key: Some(format!("{}/{}", memory.namespace, memory.key)),
            ..TxContext::default()
        };

        let mut response = self
            .db()
            .query(
                "BEGIN TRANSACTION;\n\
                 CREATE versions CONTENT $version;\n\
                 CREATE memories CONTENT $memory;\n\
                 COMMIT TRANSACTION;",
            )
            .bind(("version", VersionRow::from(initial_version)))
            .bind(("memory", MemoryRow::from(memory)))
            .await
            .map_err(backend)?;

        if let Some(abort) = take_abort(&mut response) {
            return Err(self.abort_error(abort, &ctx).await);
        }
        debug!("memory inserted");
        Ok(())
    }

    async fn get_memory(&self, memory_id: &MemoryId) -> StorageResult<MemoryRecord> {
        self.fetch_memory(memory_id.as_str())
            .await?
            .map(MemoryRecord::from)
            .ok_or_else(|| StorageError::not_found("memory", memory_id.as_str()))
    }

    async fn find_by_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> StorageResult<Option<MemoryRecord>> {
        let mut res = self
            .db()
            .query("SELECT * FROM memories WHERE namespace = $ns AND key = $key")
            .bind(("ns", namespace.to_string()))
            .bind(("key", key.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(MemoryRecord::from))
    }

    async fn list_memories(&self, filter: &MemoryFilter) -> StorageResult<Vec<MemoryRecord>> {
        let mut clauses = Vec::new();
        if filter.namespace.is_some() {
            clauses.push("namespace = $ns");
        }
        if !filter.include_inactive {
            clauses.push("active = true");
        }
        let sql = format!(
            "SELECT * FROM memories{} ORDER BY created_at ASC, memory_id ASC",
            where_clause(&clauses)
        );

        let mut query = self.db().query(sql);
        if let Some(ns) = &filter.namespace {
            query = query.bind(("ns", ns.clone()));
        }
        let mut res = query.await.map_err(backend)?;
        let rows: Vec<MemoryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(MemoryRecord::from).collect())
    }

    #[instrument(skip_all, fields(memory_id = %memory.memory_id, expected_revision))]
    async fn update_memory(
        &self,
        memory: MemoryRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord> {
        let memory_id = memory.memory_id.clone();
        self.apply_updates(
            vec![MemoryUpdate {
                memory,
                expected_revision,
                new_version: None,
            }],
            None,
        )
        .await?;
        self.get_memory(&memory_id).await
    }
}

#[async_trait]
impl VersionStore for SurrealLedger {
    #[instrument(skip_all, fields(memory_id = %version.memory_id, version_id = %version.version_id))]
    async fn commit_version(
        &self,
        version: VersionRecord,
        expected_revision: u64,
    ) -> StorageResult<MemoryRecord> {
        let mut memory = self.get_memory(&version.memory_id).await?;
        if memory.revision != expected_revision {
            return Err(StorageError::RevisionMismatch {
                entity: "memory",
                id: memory.memory_id.to_string(),
                expected: expected_revision,
                actual: memory.revision,
            });
        }
        memory.current_version_id = version.version_id.clone();
        memory.updated_at = version.edited_at;
        let memory_id = memory.memory_id.clone();

        self.apply_updates(
            vec![MemoryUpdate {
                memory,
                expected_revision,
                new_version: Some(version),
            }],
            None,
        )
        .await?;
        debug!("version committed");
        self.get_memory(&memory_id).await
    }

    async fn get_version(&self, version_id: &VersionId) -> StorageResult<VersionRecord> {
        let mut res = self
            .db()
            .query("SELECT * FROM versions WHERE version_id = $vid")
            .bind(("vid", version_id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<VersionRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .map(VersionRecord::from)
            .ok_or_else(|| StorageError::not_found("version", version_id.as_str()))
    }

    async fn versions_for(&self, memory_id: &MemoryId) -> StorageResult<Vec<VersionRecord>> {
        // Verify memory exists
        self.get_memory(memory_id).await?;

        let mut res = self
            .db()
            .query(
                "SELECT * FROM versions WHERE memory_id = $mid ORDER BY edited_at ASC, version_id ASC",
            )
            .bind(("mid", memory_id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<VersionRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(VersionRecord::from).collect())
    }
}

#[async_trait]
impl ConflictStore for SurrealLedger {
    #[instrument(skip_all, fields(pair = %pair.key()))]
    async fn open_conflict(
        &self,
        pair: ConflictPair,
        namespace: &str,
        detected_at: DateTime<Utc>,
    ) -> StorageResult<(ConflictRecord, bool)> {
        let key = pair.key();
        let record = ConflictRecord::pending(pair, namespace, detected_at);

        for _ in 0..OPEN_CONFLICT_ATTEMPTS {
            if let Some(existing) = self.pending_for_key(&key).await? {
                return Ok((existing, false));
            }

            let outcome = self
                .db()
                .query("CREATE conflicts CONTENT $row")
                .bind(("row", ConflictRow::from(record.clone())))
                .await;
            let abort = match outcome {
                Ok(mut response) => take_abort(&mut response),
                Err(e) if is_write_conflict(&e.to_string()) => continue,
                Err(e) => return Err(backend(e)),
            };

            match abort {
                None => {
                    debug!(conflict_id = %record.conflict_id, "conflict opened");
                    return Ok((record, true));
                }
                // A concurrent scan opened the same pair first.
                Some(Abort::Index(msg)) if msg.contains("idx_pending_key") => continue,
                Some(Abort::Other(msg)) if is_write_conflict(&msg) => continue,
                Some(abort) => return Err(self.abort_error(abort, &TxContext::default()).await),
            }
        }

        self.pending_for_key(&key)
            .await?
            .map(|existing| (existing, false))
            .ok_or_else(|| StorageError::Backend(format!("could not open conflict for {key}")))
    }

    async fn get_conflict(&self, conflict_id: &ConflictId) -> StorageResult<ConflictRecord> {
        self.fetch_conflict(conflict_id.as_str())
            .await?
            .map(ConflictRecord::from)
            .ok_or_else(|| StorageError::not_found("conflict", conflict_id.as_str()))
    }

    async fn latest_for_pair(&self, pair: &ConflictPair) -> StorageResult<Option<ConflictRecord>> {
        let mut res = self
            .db()
            .query(
                "SELECT * FROM conflicts WHERE pair_key = $key \
                 ORDER BY detected_at DESC, conflict_id DESC LIMIT 1",
            )
            .bind(("key", pair.key()))
            .await
            .map_err(backend)?;
        let rows: Vec<ConflictRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(ConflictRecord::from))
    }

    async fn list_conflicts(&self, filter: &ConflictFilter) -> StorageResult<Vec<ConflictRecord>> {
        let mut clauses = Vec::new();
        if filter.status.is_some() {
            clauses.push("status = $status");
        }
        if filter.namespace.is_some() {
            clauses.push("namespace = $ns");
        }
        if filter.memory_id.is_some() {
            clauses.push("(memory_a = $mid OR memory_b = $mid)");
        }
        let sql = format!(
            "SELECT * FROM conflicts{} ORDER BY detected_at ASC, conflict_id ASC",
            where_clause(&clauses)
        );

        let mut query = self.db().query(sql);
        if let Some(status) = filter.status {
            query = query.bind(("status", status));
        }
        if let Some(ns) = &filter.namespace {
            query = query.bind(("ns", ns.clone()));
        }
        if let Some(mid) = &filter.memory_id {
            query = query.bind(("mid", mid.0.clone()));
        }
        let mut res = query.await.map_err(backend)?;
        let rows: Vec<ConflictRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(ConflictRecord::from).collect())
    }

    async fn conflict_stats(&self) -> StorageResult<ConflictStats> {
        let mut res = self
            .db()
            .query("SELECT status, count() AS n FROM conflicts GROUP BY status")
            .await
            .map_err(backend)?;
        let rows: Vec<StatusCount> = res.take(0).map_err(backend)?;

        let mut stats = ConflictStats::default();
        for row in rows {
            match row.status {
                ConflictStatus::Pending => stats.pending = row.n,
                ConflictStatus::Resolved => stats.resolved = row.n,
            }
        }
        Ok(stats)
    }

    #[instrument(skip_all, fields(conflict_id = %write.conflict_id))]
    async fn resolve_conflict(
        &self,
        write: ConflictResolutionWrite,
    ) -> StorageResult<ConflictRecord> {
        let patch = ConflictPatch {
            status: ConflictStatus::Resolved,
            resolution: Some(write.resolution),
            revision: write.expected_revision + 1,
            pending_key: format!("resolved:{}", write.conflict_id),
        };
        let conflict_id = write.conflict_id.clone();

        self.apply_updates(
            write.memory_updates,
            Some((write.conflict_id, write.expected_revision, patch)),
        )
        .await?;
        debug!("conflict resolved");
        self.get_conflict(&conflict_id).await
    }
}

#[async_trait]
impl DecisionStore for SurrealLedger {
    #[instrument(skip_all, fields(decision_id = %decision.decision_id))]
    async fn insert_decision(&self, decision: DecisionRecord) -> StorageResult<()> {
        let memory_ids: Vec<MemoryId> = decision
            .retrieved_memories
            .iter()
            .map(|s| s.memory_id.clone())
            .collect();

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for i in 0..memory_ids.len() {
            sql.push_str(&format!(
                "LET $m{i} = (SELECT memory_id FROM memories WHERE memory_id = $mid{i});\n\
                 IF array::len($m{i}) = 0 {{ THROW \"{ABORT_MARKER}not_found:memory:{i}\" }};\n\
                 UPDATE memories SET usage_count += 1 WHERE memory_id = $mid{i};\n"
            ));
        }
        sql.push_str("CREATE decisions CONTENT $decision;\nCOMMIT TRANSACTION;");

        let ctx = TxContext {
            memories: memory_ids.iter().map(|id| (id.clone(), 0)).collect(),
            decision: Some(decision.decision_id.clone()),
            ..TxContext::default()
        };

        let mut query = self.db().query(sql);
        for (i, id) in memory_ids.into_iter().enumerate() {
            query = query.bind((format!("mid{i}"), id.0));
        }
        let mut response = query
            .bind(("decision", DecisionRow::from(decision)))
            .await
            .map_err(backend)?;

        if let Some(abort) = take_abort(&mut response) {
            return Err(self.abort_error(abort, &ctx).await);
        }
        debug!("decision inserted");
        Ok(())
    }

    async fn get_decision(&self, decision_id: &DecisionId) -> StorageResult<DecisionRecord> {
        let mut res = self
            .db()
            .query("SELECT * FROM decisions WHERE decision_id = $did")
            .bind(("did", decision_id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<DecisionRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .map(DecisionRecord::from)
            .ok_or_else(|| StorageError::not_found("decision", decision_id.as_str()))
    }

    async fn list_decisions(&self, query: &DecisionQuery) -> StorageResult<DecisionPage> {
        let mut clauses = vec!["organization_id = $org"];
        if query.agent_id.is_some() {
            clauses.push("agent_id = $agent");
        }
        if query.verified.is_some() {
            clauses.push("outcome_verified = $verified");
        }
        let filter = where_clause(&clauses);
        let sql = format!(
            "SELECT count() AS n FROM decisions{filter} GROUP ALL;\n\
             SELECT * FROM decisions{filter} ORDER BY created_at DESC, decision_id ASC LIMIT {} START {};",
            query.limit, query.offset
        );

        let mut q = self
            .db()
            .query(sql)
            .bind(("org", query.organization_id.clone()));
        if let Some(agent) = &query.agent_id {
            q = q.bind(("agent", agent.clone()));
        }
        if let Some(verified) = query.verified {
            q = q.bind(("verified", verified));
        }
        let mut res = q.await.map_err(backend)?;
        let counts: Vec<Count> = res.take(0).map_err(backend)?;
        let rows: Vec<DecisionRow> = res.take(1).map_err(backend)?;

        Ok(DecisionPage {
            decisions: rows.into_iter().map(DecisionRecord::from).collect(),
            total: counts.first().map(|c| c.n as usize).unwrap_or(0),
        })
    }

    #[instrument(skip_all, fields(decision_id = %decision_id))]
    async fn set_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: DecisionOutcome,
    ) -> StorageResult<DecisionRecord> {
        let sql = format!(
            "BEGIN TRANSACTION;\n\
             LET $d = (SELECT outcome_verified FROM decisions WHERE decision_id = $did);\n\
             IF array::len($d) = 0 {{ THROW \"{ABORT_MARKER}not_found:decision:0\" }};\n\
             IF $d[0].outcome_verified = true {{ THROW \"{ABORT_MARKER}already_verified:decision:0\" }};\n\
             UPDATE decisions SET outcome_verified = true, outcome_correct = $correct, \
             outcome_notes = $notes, verified_at = $at WHERE decision_id = $did;\n\
             COMMIT TRANSACTION;"
        );
        let ctx = TxContext {
            decision: Some(decision_id.clone()),
            ..TxContext::default()
        };

        let mut response = self
            .db()
            .query(sql)
            .bind(("did", decision_id.0.clone()))
            .bind(("correct", outcome.correct))
            .bind(("notes", outcome.notes))
            .bind(("at", SurrealDatetime::from(outcome.verified_at)))
            .await
            .map_err(backend)?;

        if let Some(abort) = take_abort(&mut response) {
            return Err(self.abort_error(abort, &ctx).await);
        }
        self.get_decision(decision_id).await
    }
}
