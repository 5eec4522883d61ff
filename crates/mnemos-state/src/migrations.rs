//! SurrealDB schema migrations and initialization
//!
//! This module provides initialization functions to set up all tables
//! with proper constraints and indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Mnemos tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Mnemos SurrealDB schema");

    init_memories_table(db).await?;
    init_versions_table(db).await?;
    init_conflicts_table(db).await?;
    init_decisions_table(db).await?;

    info!("Mnemos schema initialization complete");
    Ok(())
}

/// Initialize `memories` table
///
/// Schema:
/// ```text
/// TABLE memories {
///   memory_id:          STRING (unique)
///   namespace, key:     STRING (unique together)
///   content:            STRING (mirror of current version)
///   content_type:       STRING (fact | preference | instruction | observation)
///   confidence:         FLOAT  [0, 1]
///   usage_count:        INT
///   metadata:           OBJECT
///   created_at:         DATETIME
///   created_by:         STRING
///   current_version_id: STRING (-> versions.version_id)
///   revision:           INT (optimistic lock)
///   updated_at:         DATETIME
///   active:             BOOL
///   deprecated:         OBJECT?
/// }
/// ```
///
/// Rows are never deleted; deprecation is a soft flag.
async fn init_memories_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memories table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memories
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_memory_id ON TABLE memories COLUMNS memory_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_namespace_key ON TABLE memories COLUMNS namespace, key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_namespace_active ON TABLE memories COLUMNS namespace, active;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE memories COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ memories table initialized");
    Ok(())
}

/// Initialize `versions` table
///
/// Versions are immutable: updates and deletes are denied.
async fn init_versions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing versions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS versions
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_version_id ON TABLE versions COLUMNS version_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_memory_id ON TABLE versions COLUMNS memory_id;
        DEFINE INDEX IF NOT EXISTS idx_memory_id_edited_at ON TABLE versions COLUMNS memory_id, edited_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ versions table initialized");
    Ok(())
}

/// Initialize `conflicts` table
///
/// Constraints:
/// - `pending_key` is unique, which allows at most one pending row per pair
///   (resolved rows carry a per-conflict key instead)
async fn init_conflicts_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing conflicts table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS conflicts
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_conflict_id ON TABLE conflicts COLUMNS conflict_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_pending_key ON TABLE conflicts COLUMNS pending_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_pair_key ON TABLE conflicts COLUMNS pair_key;
        DEFINE INDEX IF NOT EXISTS idx_status ON TABLE conflicts COLUMNS status;
        DEFINE INDEX IF NOT EXISTS idx_namespace ON TABLE conflicts COLUMNS namespace;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ conflicts table initialized");
    Ok(())
}

/// Initialize `decisions` table
///
/// Append-only apart from the write-once outcome fields.
async fn init_decisions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing decisions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS decisions
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_decision_id ON TABLE decisions COLUMNS decision_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_org_created_at ON TABLE decisions COLUMNS organization_id, created_at;
        DEFINE INDEX IF NOT EXISTS idx_org_agent ON TABLE decisions COLUMNS organization_id, agent_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ decisions table initialized");
    Ok(())
}
