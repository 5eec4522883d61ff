//! Conflict detection and resolution through the engine boundary.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use mnemos_core::{
    ConfidenceAdjustment, ConflictFilter, ConflictStatus, ContentType, ContradictionPredicate,
    EngineConfig, EngineError, FixedClock, MemoryEngine, MemoryRecord, NewMemory, PairAssessment,
    ResolveAction,
};
use mnemos_state::fakes::InMemoryLedger;
use mnemos_state::{DeprecationReason, ResolutionAction};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn engine() -> (MemoryEngine, Arc<FixedClock>) {
    let mut config = EngineConfig::default();
    config.conflicts.scan_on_write = false;
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = MemoryEngine::new(Arc::new(InMemoryLedger::new()), config)
        .unwrap()
        .with_clock(clock.clone());
    (engine, clock)
}

async fn ingest(engine: &MemoryEngine, namespace: &str, key: &str, content: &str) -> MemoryRecord {
    engine
        .ingest(NewMemory::new(
            namespace,
            key,
            content,
            ContentType::Instruction,
            0.8,
            "alice",
        ))
        .await
        .unwrap()
}

async fn contradicting_pair(engine: &MemoryEngine) -> (MemoryRecord, MemoryRecord) {
    let a = ingest(engine, "ops", "deploy-a", "Always deploy on Friday").await;
    let b = ingest(engine, "ops", "deploy-b", "Never deploy on Friday").await;
    (a, b)
}

// ===========================================================================
// Detection
// ===========================================================================

#[tokio::test]
async fn detection_is_symmetric_and_idempotent() {
    let (engine, _) = engine();
    let (a, b) = contradicting_pair(&engine).await;

    let from_a = engine.scan(&a.memory_id).await.unwrap();
    let from_b = engine.scan(&b.memory_id).await.unwrap();
    let full = engine.full_scan("ops").await.unwrap();
    let again = engine.scan(&a.memory_id).await.unwrap();

    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].conflict_id, from_b[0].conflict_id);
    assert_eq!(from_a[0].conflict_id, full[0].conflict_id);
    assert_eq!(from_a[0].conflict_id, again[0].conflict_id);

    let stats = engine.conflict_stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.resolved, 0);
}

#[tokio::test]
async fn unrelated_and_cross_namespace_memories_are_not_paired() {
    let (engine, _) = engine();
    let a = ingest(&engine, "ops", "a", "Always deploy on Friday").await;
    ingest(&engine, "finance", "b", "Never deploy on Friday").await;
    ingest(&engine, "ops", "c", "Coffee machine is on floor three").await;

    assert!(engine.scan(&a.memory_id).await.unwrap().is_empty());
    assert!(engine.full_scan("ops").await.unwrap().is_empty());
}

#[tokio::test]
async fn tombstoned_memories_are_not_scanned() {
    let (engine, _) = engine();
    let (a, b) = contradicting_pair(&engine).await;
    engine.tombstone(&b.memory_id, "bob").await.unwrap();
    assert!(engine.scan(&a.memory_id).await.unwrap().is_empty());
    assert!(engine.scan(&b.memory_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn spawned_scan_opens_conflict() {
    let (engine, _) = engine();
    let (a, _) = contradicting_pair(&engine).await;
    engine.conflicts().spawn_scan(a.memory_id.clone()).await.unwrap();
    assert_eq!(engine.conflict_stats().await.unwrap().pending, 1);
}

#[derive(Debug)]
struct EverythingConflicts;

impl ContradictionPredicate for EverythingConflicts {
    fn assess(&self, _a: &str, _b: &str) -> PairAssessment {
        PairAssessment {
            similarity: 1.0,
            opposing: true,
        }
    }
}

#[tokio::test]
async fn injected_predicate_drives_detection() {
    let (engine, _) = engine();
    let engine = engine.with_predicate(Arc::new(EverythingConflicts));
    ingest(&engine, "ops", "a", "alpha").await;
    ingest(&engine, "ops", "b", "beta").await;
    ingest(&engine, "ops", "c", "gamma").await;

    let found = engine.full_scan("ops").await.unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(engine.conflict_stats().await.unwrap().pending, 3);
}

// ===========================================================================
// Resolution
// ===========================================================================

#[tokio::test]
async fn deprecate_one_soft_deletes_the_loser() {
    let (engine, _) = engine();
    let (a, b) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);

    let resolved = engine
        .resolve(
            &conflict.conflict_id,
            ResolveAction::DeprecateOne {
                loser: b.memory_id.clone(),
            },
            Vec::new(),
            "carol",
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    let resolution = resolved.resolution.unwrap();
    assert_eq!(resolution.resolved_by, "carol");
    assert_eq!(
        resolution.action,
        ResolutionAction::DeprecateOne {
            loser: b.memory_id.clone()
        }
    );

    let loser = engine.get_memory(&b.memory_id).await.unwrap();
    assert!(!loser.is_active());
    assert!(matches!(
        loser.deprecated.unwrap().reason,
        DeprecationReason::ConflictResolution { ref conflict_id } if conflict_id == &conflict.conflict_id
    ));
    assert!(engine.get_memory(&a.memory_id).await.unwrap().is_active());

    let stats = engine.conflict_stats().await.unwrap();
    assert_eq!((stats.pending, stats.resolved), (0, 1));
}

#[tokio::test]
async fn resolving_twice_fails_with_already_resolved() {
    let (engine, _) = engine();
    let (a, _) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);

    engine
        .resolve(&conflict.conflict_id, ResolveAction::KeepBoth, Vec::new(), "carol")
        .await
        .unwrap();
    let err = engine
        .resolve(
            &conflict.conflict_id,
            ResolveAction::DeprecateOne {
                loser: a.memory_id.clone(),
            },
            Vec::new(),
            "dave",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyResolved { .. }));

    // The first resolution stands and nothing was deprecated.
    let stored = engine.conflicts().get(&conflict.conflict_id).await.unwrap();
    assert_eq!(stored.resolution.unwrap().action, ResolutionAction::KeepBoth);
    assert!(engine.get_memory(&a.memory_id).await.unwrap().is_active());
}

#[tokio::test]
async fn concurrent_resolutions_only_one_wins() {
    let (engine, _) = engine();
    let (a, b) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);

    let (first, second) = tokio::join!(
        engine.resolve(
            &conflict.conflict_id,
            ResolveAction::DeprecateOne {
                loser: a.memory_id.clone()
            },
            Vec::new(),
            "carol",
        ),
        engine.resolve(
            &conflict.conflict_id,
            ResolveAction::DeprecateOne {
                loser: b.memory_id.clone()
            },
            Vec::new(),
            "dave",
        ),
    );
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let failure = if first.is_err() { first } else { second };
    assert!(matches!(failure, Err(EngineError::AlreadyResolved { .. })));

    let a_active = engine.get_memory(&a.memory_id).await.unwrap().is_active();
    let b_active = engine.get_memory(&b.memory_id).await.unwrap().is_active();
    assert!(a_active ^ b_active);
}

#[tokio::test]
async fn merge_versions_the_survivor_and_deprecates_the_other() {
    let (engine, clock) = engine();
    let (a, b) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);
    clock.advance(Duration::minutes(5));

    engine
        .resolve(
            &conflict.conflict_id,
            ResolveAction::Merge {
                survivor: a.memory_id.clone(),
                merged_content: "Deploy on Friday only before noon".to_string(),
            },
            Vec::new(),
            "carol",
        )
        .await
        .unwrap();

    let survivor = engine.get_memory(&a.memory_id).await.unwrap();
    assert!(survivor.is_active());
    assert_eq!(survivor.content, "Deploy on Friday only before noon");

    let history = engine.history(&a.memory_id).await.unwrap();
    assert_eq!(history.len(), 2);
    let current = history.current().unwrap();
    assert_eq!(current.edited_by, "carol");
    assert_eq!(current.parent_version_id.as_ref(), Some(&a.current_version_id));

    assert!(!engine.get_memory(&b.memory_id).await.unwrap().is_active());
}

#[tokio::test]
async fn confidence_changes_only_through_explicit_adjustment() {
    let (engine, _) = engine();
    let (a, b) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);

    engine
        .resolve(
            &conflict.conflict_id,
            ResolveAction::KeepBoth,
            vec![ConfidenceAdjustment {
                memory_id: b.memory_id.clone(),
                confidence: 0.3,
            }],
            "carol",
        )
        .await
        .unwrap();

    let adjusted = engine.get_memory(&b.memory_id).await.unwrap();
    assert_eq!(adjusted.confidence, 0.3);
    assert_eq!(adjusted.revision, b.revision + 1);
    assert_eq!(engine.get_memory(&a.memory_id).await.unwrap().confidence, 0.8);
}

#[tokio::test]
async fn out_of_range_adjustment_leaves_conflict_pending() {
    let (engine, _) = engine();
    let (a, _) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);

    let err = engine
        .resolve(
            &conflict.conflict_id,
            ResolveAction::KeepBoth,
            vec![ConfidenceAdjustment {
                memory_id: a.memory_id.clone(),
                confidence: 1.5,
            }],
            "carol",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let listed = engine
        .conflict_list(&ConflictFilter {
            status: Some(ConflictStatus::Pending),
            ..ConflictFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

// ===========================================================================
// Re-flagging
// ===========================================================================

#[tokio::test]
async fn resolved_pair_is_not_reflagged_until_a_member_changes() {
    let (engine, clock) = engine();
    let (a, _) = contradicting_pair(&engine).await;
    let conflict = engine.scan(&a.memory_id).await.unwrap().remove(0);
    engine
        .resolve(&conflict.conflict_id, ResolveAction::KeepBoth, Vec::new(), "carol")
        .await
        .unwrap();

    assert!(engine.scan(&a.memory_id).await.unwrap().is_empty());
    assert!(engine.full_scan("ops").await.unwrap().is_empty());

    clock.advance(Duration::hours(1));
    engine
        .edit(&a.memory_id, None, "Always deploy on Friday!", "alice")
        .await
        .unwrap();

    let reflagged = engine.scan(&a.memory_id).await.unwrap();
    assert_eq!(reflagged.len(), 1);
    assert_ne!(reflagged[0].conflict_id, conflict.conflict_id);
    let stats = engine.conflict_stats().await.unwrap();
    assert_eq!((stats.pending, stats.resolved), (1, 1));
}
