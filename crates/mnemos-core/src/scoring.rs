//! Relevance scoring.
//!
//! ```text
//! baseScore  = confidence × namespaceWeight
//! timeDecay  = exp(−λ × ageDays),   λ = ln 2 / halfLife(contentType)
//! usageBoost = min(ln(1 + usage) × min(factor, 0.5 × base), 0.5 × base)
//! totalScore = max(baseScore × timeDecay + usageBoost, 0)
//! ```
//!
//! Scores are computed on demand from persisted fields and an explicit
//! `now`; nothing is cached, so a score can never be stale.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use mnemos_state::{ContentType, MemoryRecord, ScoreBreakdown};

use crate::config::ScoringConfig;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Usage may add at most this fraction of the base score.
pub const USAGE_BOOST_CAP: f64 = 0.5;

/// Age in fractional days. Timestamps in the future count as age zero.
pub fn age_in_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds();
    if millis <= 0 {
        0.0
    } else {
        millis as f64 / MILLIS_PER_DAY
    }
}

/// A memory with its score at some instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    pub score: ScoreBreakdown,
}

/// Deterministic ranking order: higher total first, then more recent
/// `created_at`, then lexicographically smaller id.
pub fn rank_order(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .total_score
        .total_cmp(&a.score.total_score)
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        .then_with(|| a.memory.memory_id.cmp(&b.memory.memory_id))
}

/// Pure scoring function over one organization's settings.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Decay constant λ for a content type.
    pub fn decay_rate(&self, content_type: ContentType) -> f64 {
        std::f64::consts::LN_2 / self.config.half_life_days.for_type(content_type)
    }

    pub fn time_decay(&self, content_type: ContentType, age_days: f64) -> f64 {
        if age_days <= 0.0 {
            return 1.0;
        }
        (-self.decay_rate(content_type) * age_days).exp()
    }

    pub fn usage_boost(&self, base_score: f64, usage_count: u64) -> f64 {
        let cap = (base_score * USAGE_BOOST_CAP).max(0.0);
        let factor = self.config.usage_boost_factor.min(cap);
        ((usage_count as f64).ln_1p() * factor).min(cap)
    }

    pub fn score(&self, memory: &MemoryRecord, now: DateTime<Utc>) -> ScoreBreakdown {
        let base_score = memory.confidence * self.config.namespace_weight(&memory.namespace);
        let time_decay = self.time_decay(memory.content_type, age_in_days(memory.created_at, now));
        let usage_boost = self.usage_boost(base_score, memory.usage_count);
        ScoreBreakdown {
            total_score: (base_score * time_decay + usage_boost).max(0.0),
            base_score,
            time_decay,
            usage_boost,
        }
    }

    /// Score and sort memories in deterministic rank order.
    pub fn rank(&self, memories: Vec<MemoryRecord>, now: DateTime<Utc>) -> Vec<ScoredMemory> {
        let mut scored: Vec<ScoredMemory> = memories
            .into_iter()
            .map(|memory| {
                let score = self.score(&memory, now);
                ScoredMemory { memory, score }
            })
            .collect();
        scored.sort_by(rank_order);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mnemos_state::{MemoryId, MemoryMetadata, VersionId};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn memory(id: &str, confidence: f64, content_type: ContentType) -> MemoryRecord {
        MemoryRecord {
            memory_id: MemoryId::from(id),
            namespace: "ops".to_string(),
            key: id.to_string(),
            content: "content".to_string(),
            content_type,
            confidence,
            usage_count: 0,
            metadata: MemoryMetadata::default(),
            created_at: t0(),
            created_by: "alice".to_string(),
            current_version_id: VersionId::from("v"),
            revision: 0,
            updated_at: t0(),
            deprecated: None,
        }
    }

    #[test]
    fn test_fact_half_life_scenario() {
        let engine = ScoringEngine::default();
        let m = memory("m", 0.8, ContentType::Fact);
        let score = engine.score(&m, t0() + Duration::days(30));
        assert!((score.time_decay - 0.5).abs() < 1e-9);
        assert!((score.total_score - 0.4).abs() < 1e-9);
        assert_eq!(score.usage_boost, 0.0);
    }

    #[test]
    fn test_decay_is_one_at_creation_and_for_future_timestamps() {
        let engine = ScoringEngine::default();
        let m = memory("m", 0.8, ContentType::Observation);
        assert_eq!(engine.score(&m, t0()).time_decay, 1.0);
        assert_eq!(engine.score(&m, t0() - Duration::days(1)).time_decay, 1.0);
    }

    #[test]
    fn test_instructions_decay_slower_than_observations() {
        let engine = ScoringEngine::default();
        let later = t0() + Duration::days(14);
        let instruction = engine.score(&memory("i", 0.8, ContentType::Instruction), later);
        let observation = engine.score(&memory("o", 0.8, ContentType::Observation), later);
        assert!(instruction.total_score > observation.total_score);
    }

    #[test]
    fn test_usage_boost_is_capped_by_base() {
        let mut config = ScoringConfig::default();
        config.usage_boost_factor = 10.0;
        let engine = ScoringEngine::new(config);
        let mut m = memory("m", 0.2, ContentType::Fact);
        m.usage_count = 1_000_000;
        let score = engine.score(&m, t0());
        assert!(score.usage_boost <= 0.1 + 1e-12);
    }

    #[test]
    fn test_namespace_weight_scales_base() {
        let mut config = ScoringConfig::default();
        config.namespace_weights.insert("ops".to_string(), 0.5);
        let engine = ScoringEngine::new(config);
        let score = engine.score(&memory("m", 0.8, ContentType::Fact), t0());
        assert!((score.base_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_rank_breaks_ties_by_recency_then_id() {
        let engine = ScoringEngine::default();
        let now = t0() + Duration::days(1);
        let ranked = engine.rank(
            vec![
                memory("b", 0.5, ContentType::Fact),
                memory("a", 0.5, ContentType::Fact),
            ],
            now,
        );
        let ids: Vec<&str> = ranked.iter().map(|s| s.memory.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let older = ScoredMemory {
            memory: memory("a", 0.5, ContentType::Fact),
            score: engine.score(&memory("a", 0.5, ContentType::Fact), now),
        };
        let mut newer = older.clone();
        newer.memory.memory_id = MemoryId::from("z");
        newer.memory.created_at = t0() + Duration::hours(1);
        assert_eq!(rank_order(&newer, &older), Ordering::Less);
    }
}
