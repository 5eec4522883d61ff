//! Engine error taxonomy.

use mnemos_state::StorageError;

/// Malformed input rejected at the engine boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must be a finite value in [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("unknown content type: {0}")]
    UnknownContentType(String),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("content is {len} bytes, the limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("memory key already exists: {key}")]
    DuplicateKey { key: String },

    #[error("invalid conflict pair: {0}")]
    InvalidPair(String),

    #[error("version {version_id} does not belong to memory {memory_id}")]
    ForeignVersion {
        memory_id: String,
        version_id: String,
    },

    #[error("memory {memory_id} is deprecated")]
    DeprecatedMemory { memory_id: String },

    #[error("limit must be between 1 and {max}, got {value}")]
    BadLimit { value: usize, max: usize },

    #[error("memory {memory_id} is referenced more than once")]
    DuplicateMemory { memory_id: String },

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
}

/// Mnemos engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict already resolved: {conflict_id}")]
    AlreadyResolved { conflict_id: String },

    #[error("decision outcome already verified: {decision_id}")]
    AlreadyVerified { decision_id: String },

    #[error("concurrent modification of {entity} {id}; reload and retry")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Only optimistic-lock failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }

    /// Stable machine-readable kind, used in logs and RPC error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::AlreadyResolved { .. } => "already_resolved",
            EngineError::AlreadyVerified { .. } => "already_verified",
            EngineError::ConcurrentModification { .. } => "concurrent_modification",
            EngineError::Validation(_) => "validation_error",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::Config(_) => "config_error",
            EngineError::Storage(_) => "storage_error",
            EngineError::Serialization(_) => "serialization_error",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StorageError::Duplicate {
                entity: "memory",
                key,
            } => EngineError::Validation(ValidationError::DuplicateKey { key }),
            StorageError::Duplicate { entity, key } => {
                EngineError::Storage(format!("duplicate {entity}: {key}"))
            }
            StorageError::RevisionMismatch { entity, id, .. } => {
                EngineError::ConcurrentModification { entity, id }
            }
            StorageError::AlreadyResolved { conflict_id } => {
                EngineError::AlreadyResolved { conflict_id }
            }
            StorageError::AlreadyVerified { decision_id } => {
                EngineError::AlreadyVerified { decision_id }
            }
            StorageError::InvalidRecord { entity, reason } => {
                EngineError::InvariantViolation(format!("invalid {entity} record: {reason}"))
            }
            StorageError::Backend(msg) => EngineError::Storage(msg),
        }
    }
}

/// Result type for Mnemos engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_mismatch_maps_to_concurrent_modification() {
        let err: EngineError = StorageError::RevisionMismatch {
            entity: "memory",
            id: "m-1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "concurrent_modification");
        assert!(err.to_string().contains("m-1"));
    }

    #[test]
    fn test_duplicate_memory_key_is_validation() {
        let err: EngineError = StorageError::Duplicate {
            entity: "memory",
            key: "ops/deploy".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::DuplicateKey { ref key }) if key == "ops/deploy"
        ));
    }

    #[test]
    fn test_invalid_record_is_invariant_violation() {
        let err: EngineError = StorageError::InvalidRecord {
            entity: "version",
            reason: "dangling parent".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "invariant_violation");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::OutOfRange {
            field: "confidence",
            value: 1.5,
        };
        assert!(err.to_string().contains("confidence"));
        assert!(err.to_string().contains("1.5"));
    }
}
