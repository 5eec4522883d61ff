use chrono::{DateTime, Duration, TimeZone, Utc};
use mnemos_state::storage_traits::*;
use mnemos_state::{StorageError, SurrealLedger};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn sample_memory(key: &str, content: &str) -> (MemoryRecord, VersionRecord) {
    let memory_id = MemoryId::new();
    let version = VersionRecord::new(memory_id.clone(), None, content, "alice", t0());
    let memory = MemoryRecord {
        memory_id,
        namespace: "ops".to_string(),
        key: key.to_string(),
        content: content.to_string(),
        content_type: ContentType::Instruction,
        confidence: 0.7,
        usage_count: 0,
        metadata: MemoryMetadata {
            tags: vec!["deploy".to_string()],
            source: Some(MemorySource::Agent {
                agent_id: "agent-1".to_string(),
            }),
        },
        created_at: t0(),
        created_by: "alice".to_string(),
        current_version_id: version.version_id.clone(),
        revision: 0,
        updated_at: t0(),
        deprecated: None,
    };
    (memory, version)
}

fn sample_decision(memories: &[(&MemoryRecord, &VersionRecord)]) -> DecisionRecord {
    DecisionRecord {
        decision_id: DecisionId::new(),
        agent_id: "agent-1".to_string(),
        organization_id: "acme".to_string(),
        input_query: "when can we deploy?".to_string(),
        output: "weekdays".to_string(),
        confidence: 0.8,
        retrieved_memories: memories
            .iter()
            .map(|(memory, version)| MemorySnapshot {
                memory_id: memory.memory_id.clone(),
                version_id: version.version_id.clone(),
                namespace: memory.namespace.clone(),
                content: memory.content.clone(),
                content_type: memory.content_type,
                score_at_decision: 0.7,
                breakdown: ScoreBreakdown {
                    total_score: 0.7,
                    base_score: 0.7,
                    time_decay: 1.0,
                    usage_boost: 0.0,
                },
            })
            .collect(),
        model_used: "model-x".to_string(),
        latency_ms: 42,
        created_at: t0(),
        outcome_verified: false,
        outcome_correct: None,
        outcome_notes: None,
        verified_at: None,
    }
}

async fn seeded(ledger: &SurrealLedger, key: &str, content: &str) -> MemoryRecord {
    let (memory, version) = sample_memory(key, content);
    ledger.insert_memory(memory.clone(), version).await.unwrap();
    memory
}

fn deprecated_by(memory: &MemoryRecord, conflict_id: &ConflictId) -> MemoryRecord {
    let mut loser = memory.clone();
    loser.deprecated = Some(Deprecation {
        reason: DeprecationReason::ConflictResolution {
            conflict_id: conflict_id.clone(),
        },
        by: "carol".to_string(),
        at: t0(),
    });
    loser
}

// ===========================================================================
// MemoryStore / VersionStore
// ===========================================================================

#[tokio::test]
async fn surreal_memory_insert_get_and_find() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let (memory, version) = sample_memory("deploy-window", "Deploy only on weekdays");
    ledger.insert_memory(memory.clone(), version).await.unwrap();

    let fetched = ledger.get_memory(&memory.memory_id).await.unwrap();
    assert_eq!(fetched.content, memory.content);
    assert_eq!(fetched.metadata, memory.metadata);
    assert_eq!(fetched.created_at, memory.created_at);

    let found = ledger.find_by_key("ops", "deploy-window").await.unwrap();
    assert!(found.is_some());
    assert!(ledger.find_by_key("ops", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn surreal_schema_init_is_repeatable() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let db = ledger.handle().db();
    mnemos_state::migrations::init_schema(db).await.unwrap();
    mnemos_state::migrations::init_schema(db).await.unwrap();

    // Unique indexes survive a second run.
    let (first, v1) = sample_memory("k", "one");
    ledger.insert_memory(first, v1).await.unwrap();
    let (second, v2) = sample_memory("k", "two");
    let err = ledger.insert_memory(second, v2).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate { .. }), "{err:?}");
}

#[tokio::test]
async fn surreal_memory_duplicate_key_rejected() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let (first, v1) = sample_memory("k", "one");
    ledger.insert_memory(first, v1).await.unwrap();

    let (second, v2) = sample_memory("k", "two");
    let err = ledger.insert_memory(second, v2).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate { .. }), "{err:?}");
}

#[tokio::test]
async fn surreal_version_commit_and_stale_revision() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let (memory, v1) = sample_memory("k", "v1");
    ledger.insert_memory(memory.clone(), v1.clone()).await.unwrap();

    let v2 = VersionRecord::new(
        memory.memory_id.clone(),
        Some(v1.version_id.clone()),
        "v2",
        "bob",
        t0() + Duration::minutes(1),
    );
    let stored = ledger.commit_version(v2.clone(), 0).await.unwrap();
    assert_eq!(stored.revision, 1);
    assert_eq!(stored.content, "v2");
    assert_eq!(stored.current_version_id, v2.version_id);

    let stale = VersionRecord::new(memory.memory_id.clone(), Some(v1.version_id), "v3", "eve", t0());
    let err = ledger.commit_version(stale, 0).await.unwrap_err();
    assert!(matches!(err, StorageError::RevisionMismatch { .. }), "{err:?}");

    let versions = ledger.versions_for(&memory.memory_id).await.unwrap();
    assert_eq!(versions.len(), 2);
}

// ===========================================================================
// DecisionStore
// ===========================================================================

#[tokio::test]
async fn surreal_decision_usage_and_outcome() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let (memory, v1) = sample_memory("k", "content");
    ledger.insert_memory(memory.clone(), v1.clone()).await.unwrap();

    let decision = sample_decision(&[(&memory, &v1)]);
    ledger.insert_decision(decision.clone()).await.unwrap();
    assert_eq!(ledger.get_memory(&memory.memory_id).await.unwrap().usage_count, 1);

    let page = ledger
        .list_decisions(&DecisionQuery::for_org("acme"))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.decisions[0].decision_id, decision.decision_id);

    let outcome = DecisionOutcome {
        correct: false,
        notes: None,
        verified_at: t0() + Duration::hours(2),
    };
    let verified = ledger
        .set_outcome(&decision.decision_id, outcome.clone())
        .await
        .unwrap();
    assert_eq!(verified.outcome_correct, Some(false));

    let err = ledger
        .set_outcome(&decision.decision_id, outcome)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyVerified { .. }), "{err:?}");
}

#[tokio::test]
async fn surreal_decision_with_missing_memory_rolls_back() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let (kept, kept_v) = sample_memory("kept", "stored");
    ledger.insert_memory(kept.clone(), kept_v.clone()).await.unwrap();
    let (ghost, ghost_v) = sample_memory("ghost", "never stored");

    let decision = sample_decision(&[(&kept, &kept_v), (&ghost, &ghost_v)]);
    let err = ledger.insert_decision(decision.clone()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }), "{err:?}");

    assert_eq!(ledger.get_memory(&kept.memory_id).await.unwrap().usage_count, 0);
    assert!(ledger.get_decision(&decision.decision_id).await.is_err());
    let page = ledger
        .list_decisions(&DecisionQuery::for_org("acme"))
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

// ===========================================================================
// ConflictStore
// ===========================================================================

#[tokio::test]
async fn surreal_conflict_open_is_idempotent_per_pair() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let a = seeded(&ledger, "a", "always deploy on friday").await;
    let b = seeded(&ledger, "b", "never deploy on friday").await;

    let pair = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()).unwrap();
    let (first, created) = ledger.open_conflict(pair, "ops", t0()).await.unwrap();
    assert!(created);

    let reversed = ConflictPair::new(b.memory_id.clone(), a.memory_id.clone()).unwrap();
    let (second, created) = ledger.open_conflict(reversed, "ops", t0()).await.unwrap();
    assert!(!created);
    assert_eq!(first.conflict_id, second.conflict_id);
    assert_eq!(
        ledger.conflict_stats().await.unwrap(),
        ConflictStats { pending: 1, resolved: 0 }
    );
}

#[tokio::test]
async fn surreal_concurrent_opens_share_one_pending_record() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let a = seeded(&ledger, "a", "always deploy on friday").await;
    let b = seeded(&ledger, "b", "never deploy on friday").await;
    let pair = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()).unwrap();

    let results = futures::future::join_all(
        (0..4).map(|_| ledger.open_conflict(pair.clone(), "ops", t0())),
    )
    .await;
    let opened: Vec<(ConflictRecord, bool)> =
        results.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(opened.iter().filter(|(_, created)| *created).count(), 1);
    let id = &opened[0].0.conflict_id;
    assert!(opened.iter().all(|(c, _)| &c.conflict_id == id));
    assert_eq!(ledger.conflict_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn surreal_conflict_resolution_is_atomic_and_final() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let a = seeded(&ledger, "a", "always deploy on friday").await;
    let b = seeded(&ledger, "b", "never deploy on friday").await;
    let pair = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()).unwrap();
    let (conflict, _) = ledger.open_conflict(pair.clone(), "ops", t0()).await.unwrap();

    let write = ConflictResolutionWrite {
        conflict_id: conflict.conflict_id.clone(),
        expected_revision: 0,
        resolution: Resolution {
            action: ResolutionAction::DeprecateOne {
                loser: b.memory_id.clone(),
            },
            resolved_by: "carol".to_string(),
            resolved_at: t0() + Duration::minutes(5),
        },
        memory_updates: vec![MemoryUpdate {
            memory: deprecated_by(&b, &conflict.conflict_id),
            expected_revision: 0,
            new_version: None,
        }],
    };

    let resolved = ledger.resolve_conflict(write.clone()).await.unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert_eq!(resolved.revision, 1);
    assert!(!ledger.get_memory(&b.memory_id).await.unwrap().is_active());
    assert!(ledger.get_memory(&a.memory_id).await.unwrap().is_active());
    assert_eq!(
        ledger.conflict_stats().await.unwrap(),
        ConflictStats { pending: 0, resolved: 1 }
    );

    let err = ledger.resolve_conflict(write).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyResolved { .. }), "{err:?}");

    let (reopened, created) = ledger
        .open_conflict(pair.clone(), "ops", t0() + Duration::hours(1))
        .await
        .unwrap();
    assert!(created);
    assert_ne!(reopened.conflict_id, conflict.conflict_id);
    let latest = ledger.latest_for_pair(&pair).await.unwrap().unwrap();
    assert_eq!(latest.conflict_id, reopened.conflict_id);
}

#[tokio::test]
async fn surreal_conflict_resolution_rolls_back_on_stale_memory() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let a = seeded(&ledger, "a", "always deploy on friday").await;
    let b = seeded(&ledger, "b", "never deploy on friday").await;
    let pair = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()).unwrap();
    let (conflict, _) = ledger.open_conflict(pair, "ops", t0()).await.unwrap();

    // `a` changes under the resolver.
    let mut touched = a.clone();
    touched.confidence = 0.1;
    ledger.update_memory(touched, 0).await.unwrap();

    let write = ConflictResolutionWrite {
        conflict_id: conflict.conflict_id.clone(),
        expected_revision: 0,
        resolution: Resolution {
            action: ResolutionAction::KeepBoth,
            resolved_by: "carol".to_string(),
            resolved_at: t0(),
        },
        memory_updates: vec![
            MemoryUpdate {
                memory: deprecated_by(&b, &conflict.conflict_id),
                expected_revision: 0,
                new_version: None,
            },
            MemoryUpdate {
                memory: a.clone(),
                expected_revision: 0,
                new_version: None,
            },
        ],
    };
    let err = ledger.resolve_conflict(write).await.unwrap_err();
    assert!(matches!(err, StorageError::RevisionMismatch { .. }), "{err:?}");

    assert!(ledger.get_conflict(&conflict.conflict_id).await.unwrap().is_pending());
    let b_now = ledger.get_memory(&b.memory_id).await.unwrap();
    assert!(b_now.is_active());
    assert_eq!(b_now.revision, 0);
}

#[tokio::test]
async fn surreal_conflict_list_filters_and_order() {
    let ledger = SurrealLedger::in_memory().await.unwrap();
    let a = seeded(&ledger, "a", "x").await;
    let b = seeded(&ledger, "b", "y").await;
    let c = seeded(&ledger, "c", "z").await;
    let ab = ConflictPair::new(a.memory_id.clone(), b.memory_id.clone()).unwrap();
    let bc = ConflictPair::new(b.memory_id.clone(), c.memory_id.clone()).unwrap();
    ledger
        .open_conflict(bc, "ops", t0() + Duration::seconds(1))
        .await
        .unwrap();
    ledger.open_conflict(ab, "ops", t0()).await.unwrap();

    let all = ledger.list_conflicts(&ConflictFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].detected_at < all[1].detected_at);

    let for_a = ledger
        .list_conflicts(&ConflictFilter {
            memory_id: Some(a.memory_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_a.len(), 1);
    assert!(for_a[0].pair.contains(&a.memory_id));

    let resolved = ledger
        .list_conflicts(&ConflictFilter {
            status: Some(ConflictStatus::Resolved),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(resolved.is_empty());

    let elsewhere = ledger
        .list_conflicts(&ConflictFilter {
            namespace: Some("billing".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(elsewhere.is_empty());
}
