//! Ingestion input and boundary validation for memories.
//!
//! Everything that arrives from outside the engine (RPC payloads, CLI
//! arguments) passes through these checks before it reaches storage, so
//! malformed metadata or out-of-range confidence never gets persisted.

use mnemos_state::{ContentType, MemoryMetadata, MemorySource};

use super::error::ValidationError;

/// Maximum number of tags on one memory.
pub const MAX_TAGS: usize = 32;
/// Maximum length of one tag, in characters.
pub const MAX_TAG_LEN: usize = 64;

/// A memory to be ingested.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub namespace: String,
    pub key: String,
    pub content: String,
    pub content_type: ContentType,
    pub confidence: f64,
    pub metadata: MemoryMetadata,
    pub created_by: String,
}

impl NewMemory {
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        content: impl Into<String>,
        content_type: ContentType,
        confidence: f64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            content: content.into(),
            content_type,
            confidence,
            metadata: MemoryMetadata::default(),
            created_by: created_by.into(),
        }
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check every field; `max_content_bytes` comes from the limits config.
    pub fn validate(&self, max_content_bytes: usize) -> Result<(), ValidationError> {
        require_non_empty("namespace", &self.namespace)?;
        require_non_empty("key", &self.key)?;
        require_non_empty("created_by", &self.created_by)?;
        validate_content(&self.content, max_content_bytes)?;
        validate_unit_interval("confidence", self.confidence)?;
        validate_metadata(&self.metadata)
    }
}

pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

pub fn validate_content(content: &str, max_bytes: usize) -> Result<(), ValidationError> {
    require_non_empty("content", content)?;
    if content.len() > max_bytes {
        return Err(ValidationError::ContentTooLong {
            len: content.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

/// Finite and within `[0, 1]`.
pub fn validate_unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(())
}

pub fn parse_content_type(raw: &str) -> Result<ContentType, ValidationError> {
    raw.trim()
        .to_lowercase()
        .parse()
        .map_err(|_| ValidationError::UnknownContentType(raw.to_string()))
}

/// Parse a loosely-typed JSON blob into validated metadata.
pub fn parse_metadata(value: serde_json::Value) -> Result<MemoryMetadata, ValidationError> {
    let metadata: MemoryMetadata = serde_json::from_value(value)
        .map_err(|e| ValidationError::MalformedMetadata(e.to_string()))?;
    validate_metadata(&metadata)?;
    Ok(metadata)
}

pub fn validate_metadata(metadata: &MemoryMetadata) -> Result<(), ValidationError> {
    if metadata.tags.len() > MAX_TAGS {
        return Err(ValidationError::MalformedMetadata(format!(
            "{} tags, at most {MAX_TAGS} allowed",
            metadata.tags.len()
        )));
    }
    for tag in &metadata.tags {
        if tag.trim().is_empty() {
            return Err(ValidationError::MalformedMetadata(
                "tags must not be empty".to_string(),
            ));
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(ValidationError::MalformedMetadata(format!(
                "tag `{tag}` is longer than {MAX_TAG_LEN} characters"
            )));
        }
        if tag.chars().any(|c| c.is_uppercase()) {
            return Err(ValidationError::MalformedMetadata(format!(
                "tag `{tag}` must be lowercase"
            )));
        }
    }

    let source_id = match &metadata.source {
        None => None,
        Some(MemorySource::Conversation { session_id }) => Some(session_id),
        Some(MemorySource::Document { uri }) => Some(uri),
        Some(MemorySource::Agent { agent_id }) => Some(agent_id),
        Some(MemorySource::Import { batch_id }) => Some(batch_id),
    };
    if source_id.is_some_and(|id| id.trim().is_empty()) {
        return Err(ValidationError::MalformedMetadata(
            "source identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}
