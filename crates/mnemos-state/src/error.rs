//! Error types for mnemos-state

use thiserror::Error;

/// Errors that can occur while connecting to or preparing the backing store
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
///
/// Every backend maps its native failures onto these variants so the engine
/// can classify them without knowing which store it talks to.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// No row with this identifier exists
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint was violated
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// Optimistic-lock check failed; the row changed since it was read
    #[error("{entity} {id} revision mismatch: expected {expected}, found {actual}")]
    RevisionMismatch {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Conflict is no longer pending
    #[error("conflict already resolved: {conflict_id}")]
    AlreadyResolved { conflict_id: String },

    /// Decision outcome was already recorded
    #[error("decision outcome already verified: {decision_id}")]
    AlreadyVerified { decision_id: String },

    /// A stored row could not be interpreted
    #[error("invalid {entity} record: {reason}")]
    InvalidRecord { entity: &'static str, reason: String },

    /// Backend-specific failure (connection, query, transaction)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
