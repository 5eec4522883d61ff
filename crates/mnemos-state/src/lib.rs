//! Mnemos-State: Persistence for the Mnemos memory engine
//!
//! This crate owns the four logical tables behind the engine (memories,
//! versions, conflicts, decisions) and every write that must be atomic
//! across them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Data integrity, optimistic concurrency, and append-only history.
//!
//! ## Key Components
//!
//! - `storage_traits`: backend-agnostic async traits and record types
//! - `SurrealLedger`: SurrealDB implementation (in-memory, local or cloud)
//! - `fakes::InMemoryLedger`: single-mutex implementation for tests

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use handle::{RemoteAuth, StoreTarget, SurrealHandle};
pub use storage_traits::{
    content_digest, ConflictFilter, ConflictId, ConflictPair, ConflictRecord,
    ConflictResolutionWrite, ConflictStats, ConflictStatus, ConflictStore, ContentType,
    DecisionId, DecisionOutcome, DecisionPage, DecisionQuery, DecisionRecord, DecisionStore,
    Deprecation, DeprecationReason, Ledger, MemoryFilter, MemoryId, MemoryMetadata, MemoryRecord,
    MemorySnapshot, MemorySource, MemoryStore, MemoryUpdate, Resolution, ResolutionAction,
    ScoreBreakdown, StorageResult, VersionId, VersionRecord, VersionStore,
};
pub use surreal_ledger::SurrealLedger;

/// Result type for mnemos-state operations
pub type Result<T> = std::result::Result<T, StateError>;
