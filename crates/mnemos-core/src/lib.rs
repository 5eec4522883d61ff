//! Mnemos Core: memory lifecycle and scoring engine
//!
//! Stores versioned knowledge fragments ("memories"), scores them with a
//! decaying relevance function, tracks contradictions between them and
//! keeps a replayable audit trail of the decisions agents made with them.
//!
//! ## Layer 1 - Engine
//!
//! - `scoring`: pure relevance scoring and deterministic ranking
//! - `catalog`: ingestion, lookup, tombstones and search
//! - `versioning`: append-only version chains and rollback
//! - `conflict`: contradiction detection and resolution
//! - `decision`: by-value decision snapshots and outcome verification
//! - `replay`: decision replay and context drift
//! - `engine`: the boundary that wires it all together and retries
//!   optimistic-lock failures

pub mod api;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod decision;
pub mod domain;
pub mod engine;
pub mod metrics;
pub mod obs;
pub mod replay;
pub mod scoring;
pub mod telemetry;
pub mod versioning;

pub use catalog::{MemoryCatalog, SearchHit, SearchRequest};
pub use config::{
    ConflictConfig, DriftConfig, EngineConfig, HalfLives, LimitsConfig, OrganizationOverrides,
    ScoringConfig,
};
pub use conflict::{
    ConfidenceAdjustment, ConflictDetector, ContradictionPredicate, LexicalPredicate,
    PairAssessment, ResolveAction,
};
pub use decision::{DecisionRecorder, RecordDecision};
pub use domain::{Clock, EngineError, FixedClock, NewMemory, Result, SystemClock, ValidationError};
pub use engine::MemoryEngine;
pub use replay::{HistoricalMemory, ReplayAnalysis, ReplayEngine, ReplayReport};
pub use scoring::{ScoredMemory, ScoringEngine};
pub use versioning::{VersionHistory, VersionManager};

pub use mnemos_state::{
    ConflictFilter, ConflictId, ConflictRecord, ConflictStatus, ContentType, DecisionId,
    DecisionQuery, DecisionRecord, MemoryFilter, MemoryId, MemoryMetadata, MemoryRecord,
    MemorySource, ScoreBreakdown, VersionId, VersionRecord,
};
