//! Memory ingestion, lookup, tombstoning and ranked search.

use std::sync::Arc;

use mnemos_state::{
    Deprecation, DeprecationReason, Ledger, MemoryFilter, MemoryId, MemoryRecord, ScoreBreakdown,
    VersionRecord,
};
use tracing::instrument;

use crate::config::EngineConfig;
use crate::domain::memory::require_non_empty;
use crate::domain::{text, Clock, NewMemory, Result, ValidationError};
use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::ScoringEngine;

/// A search over active memories.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Free text; empty matches every memory.
    pub query: String,
    pub namespace: Option<String>,
    /// Selects the organization's scoring overrides.
    pub organization_id: Option<String>,
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn for_org(mut self, organization_id: &str) -> Self {
        self.organization_id = Some(organization_id.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub memory: MemoryRecord,
    pub score: ScoreBreakdown,
    /// Lexical match quality in `[0, 1]`; informational, ranking uses `score`.
    pub relevance: f64,
}

/// Front door to the memories table.
#[derive(Clone)]
pub struct MemoryCatalog {
    ledger: Arc<dyn Ledger>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl MemoryCatalog {
    pub fn new(ledger: Arc<dyn Ledger>, config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            config,
            clock,
        }
    }

    /// Validate and store a new memory with its first version.
    #[instrument(skip(self, new), fields(namespace = %new.namespace, key = %new.key))]
    pub async fn create(&self, new: NewMemory) -> Result<MemoryRecord> {
        new.validate(self.config.limits.max_content_bytes)?;

        let now = self.clock.now();
        let memory_id = MemoryId::new();
        let version = VersionRecord::new(memory_id.clone(), None, &new.content, &new.created_by, now);
        let memory = MemoryRecord {
            memory_id,
            namespace: new.namespace,
            key: new.key,
            content: new.content,
            content_type: new.content_type,
            confidence: new.confidence,
            usage_count: 0,
            metadata: new.metadata,
            created_at: now,
            created_by: new.created_by,
            current_version_id: version.version_id.clone(),
            revision: 0,
            updated_at: now,
            deprecated: None,
        };

        self.ledger
            .insert_memory(memory.clone(), version)
            .await?;

        METRICS.inc_memories_created();
        obs::emit_memory_created(
            memory.memory_id.as_str(),
            &memory.namespace,
            memory.content_type.as_str(),
        );
        Ok(memory)
    }

    pub async fn get(&self, memory_id: &MemoryId) -> Result<MemoryRecord> {
        Ok(self.ledger.get_memory(memory_id).await?)
    }

    pub async fn find(&self, namespace: &str, key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.ledger.find_by_key(namespace, key).await?)
    }

    pub async fn list(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        Ok(self.ledger.list_memories(filter).await?)
    }

    /// Soft-delete a memory. Its versions and any decision snapshots that
    /// reference it are kept.
    #[instrument(skip(self))]
    pub async fn tombstone(&self, memory_id: &MemoryId, actor: &str) -> Result<MemoryRecord> {
        require_non_empty("actor", actor)?;
        let mut memory = self.ledger.get_memory(memory_id).await?;
        if !memory.is_active() {
            return Err(ValidationError::DeprecatedMemory {
                memory_id: memory_id.to_string(),
            }
            .into());
        }

        let now = self.clock.now();
        let expected_revision = memory.revision;
        memory.deprecated = Some(Deprecation {
            reason: DeprecationReason::Tombstoned,
            by: actor.to_string(),
            at: now,
        });
        memory.updated_at = now;
        let stored = self
            .ledger
            .update_memory(memory, expected_revision)
            .await?;

        METRICS.inc_memories_tombstoned();
        obs::emit_memory_tombstoned(stored.memory_id.as_str(), actor);
        Ok(stored)
    }

    /// Ranked search over active memories, scored at the clock's "now".
    #[instrument(skip(self, request), fields(query = %request.query))]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let limit = self.config.limits.search_limit(request.limit)?;
        let mut filter = MemoryFilter::active();
        if let Some(namespace) = &request.namespace {
            filter = filter.in_namespace(namespace);
        }
        let candidates: Vec<MemoryRecord> = self
            .ledger
            .list_memories(&filter)
            .await?
            .into_iter()
            .filter(|m| text::matches_query(&request.query, &m.content))
            .collect();

        let scoring =
            ScoringEngine::new(self.config.scoring_for(request.organization_id.as_deref()));
        let hits = scoring
            .rank(candidates, self.clock.now())
            .into_iter()
            .take(limit)
            .map(|scored| SearchHit {
                relevance: text::relevance(&request.query, &scored.memory.content),
                memory: scored.memory,
                score: scored.score,
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineError, FixedClock};
    use chrono::{Duration, TimeZone, Utc};
    use mnemos_state::fakes::InMemoryLedger;
    use mnemos_state::ContentType;

    fn catalog() -> (MemoryCatalog, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let catalog = MemoryCatalog::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(EngineConfig::default()),
            clock.clone(),
        );
        (catalog, clock)
    }

    fn fact(key: &str, content: &str, confidence: f64) -> NewMemory {
        NewMemory::new("ops", key, content, ContentType::Fact, confidence, "alice")
    }

    #[tokio::test]
    async fn test_create_and_find_by_key() {
        let (catalog, _) = catalog();
        let created = catalog
            .create(fact("refunds", "Refund window is 30 days", 0.8))
            .await
            .unwrap();
        assert_eq!(created.revision, 0);
        let found = catalog.find("ops", "refunds").await.unwrap().unwrap();
        assert_eq!(found.memory_id, created.memory_id);
        assert!(catalog.find("ops", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_validation_error() {
        let (catalog, _) = catalog();
        catalog.create(fact("k", "first", 0.5)).await.unwrap();
        let err = catalog.create(fact("k", "second", 0.5)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_persisted() {
        let (catalog, _) = catalog();
        let err = catalog.create(fact("k", "text", 1.5)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(catalog.list(&MemoryFilter::active()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_score_and_skips_tombstones() {
        let (catalog, clock) = catalog();
        let low = catalog.create(fact("a", "refund policy draft", 0.3)).await.unwrap();
        let high = catalog.create(fact("b", "refund policy final", 0.9)).await.unwrap();
        let gone = catalog.create(fact("c", "refund policy old", 0.99)).await.unwrap();
        catalog.create(fact("d", "unrelated text", 1.0)).await.unwrap();
        catalog.tombstone(&gone.memory_id, "bob").await.unwrap();
        clock.advance(Duration::days(3));

        let hits = catalog.search(&SearchRequest::new("refund policy")).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.memory.memory_id.clone()).collect();
        assert_eq!(ids, vec![high.memory_id, low.memory_id]);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.relevance)));
        assert!(hits[0].score.time_decay < 1.0);
    }

    #[tokio::test]
    async fn test_search_limit_validation() {
        let (catalog, _) = catalog();
        for i in 0..3 {
            catalog
                .create(fact(&format!("k{i}"), "deploy note", 0.5))
                .await
                .unwrap();
        }
        let hits = catalog
            .search(&SearchRequest::new("").with_limit(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let err = catalog
            .search(&SearchRequest::new("").with_limit(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::BadLimit { .. })
        ));
    }

    #[tokio::test]
    async fn test_tombstone_twice_fails() {
        let (catalog, _) = catalog();
        let m = catalog.create(fact("k", "text", 0.5)).await.unwrap();
        let stored = catalog.tombstone(&m.memory_id, "bob").await.unwrap();
        assert!(!stored.is_active());
        assert_eq!(stored.revision, 1);
        let err = catalog.tombstone(&m.memory_id, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::DeprecatedMemory { .. })
        ));
    }
}
