//! Property tests for the scoring function.

use chrono::{DateTime, Duration, TimeZone, Utc};
use mnemos_core::{ContentType, MemoryId, MemoryMetadata, MemoryRecord, ScoringConfig, ScoringEngine, VersionId};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn memory(id: &str, confidence: f64, content_type: ContentType, usage_count: u64) -> MemoryRecord {
    MemoryRecord {
        memory_id: MemoryId::from(id),
        namespace: "ops".to_string(),
        key: id.to_string(),
        content: "content".to_string(),
        content_type,
        confidence,
        usage_count,
        metadata: MemoryMetadata::default(),
        created_at: t0(),
        created_by: "alice".to_string(),
        current_version_id: VersionId::from("v1"),
        revision: 0,
        updated_at: t0(),
        deprecated: None,
    }
}

fn content_type() -> impl Strategy<Value = ContentType> {
    prop::sample::select(ContentType::ALL.to_vec())
}

proptest! {
    #[test]
    fn decay_is_one_at_age_zero(ct in content_type(), confidence in 0.0f64..=1.0) {
        let engine = ScoringEngine::default();
        let score = engine.score(&memory("m", confidence, ct, 0), t0());
        prop_assert_eq!(score.time_decay, 1.0);
        prop_assert!((score.total_score - confidence).abs() < 1e-12);
    }

    #[test]
    fn decay_strictly_decreases_with_age(
        ct in content_type(),
        age_mins in 0i64..1_000_000,
        step_mins in 1i64..100_000,
    ) {
        let engine = ScoringEngine::default();
        let m = memory("m", 0.8, ct, 0);
        let earlier = engine.score(&m, t0() + Duration::minutes(age_mins));
        let later = engine.score(&m, t0() + Duration::minutes(age_mins + step_mins));
        prop_assert!(later.time_decay < earlier.time_decay);
        prop_assert!(later.time_decay > 0.0);
    }

    #[test]
    fn usage_boost_is_monotone_and_bounded(
        confidence in 0.0f64..=1.0,
        factor in 0.0f64..5.0,
        usage in 0u64..1_000_000,
        extra in 0u64..1_000_000,
    ) {
        let engine = ScoringEngine::new(ScoringConfig {
            usage_boost_factor: factor,
            ..ScoringConfig::default()
        });
        let low = engine.score(&memory("m", confidence, ContentType::Fact, usage), t0());
        let high = engine.score(&memory("m", confidence, ContentType::Fact, usage + extra), t0());
        prop_assert!(high.usage_boost >= low.usage_boost);
        prop_assert!(high.usage_boost <= 0.5 * high.base_score + 1e-12);
        prop_assert!(low.total_score >= 0.0);
    }

    #[test]
    fn ranking_ignores_input_order(confidences in prop::collection::vec(0.0f64..=1.0, 1..12)) {
        let engine = ScoringEngine::default();
        let memories: Vec<MemoryRecord> = confidences
            .iter()
            .enumerate()
            .map(|(i, c)| memory(&format!("m{i:02}"), *c, ContentType::Fact, 0))
            .collect();
        let mut reversed = memories.clone();
        reversed.reverse();

        let now = t0() + Duration::days(3);
        let a: Vec<MemoryId> = engine.rank(memories, now).into_iter().map(|s| s.memory.memory_id).collect();
        let b: Vec<MemoryId> = engine.rank(reversed, now).into_iter().map(|s| s.memory.memory_id).collect();
        prop_assert_eq!(a, b);
    }
}

#[test]
fn fact_memory_halves_after_thirty_days() {
    let engine = ScoringEngine::default();
    let score = engine.score(
        &memory("m", 0.8, ContentType::Fact, 0),
        t0() + Duration::days(30),
    );
    assert!((score.time_decay - 0.5).abs() < 1e-9);
    assert!((score.total_score - 0.4).abs() < 1e-9);
}
