//! End-to-end pipeline runs over an in-process catalog and an in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kiln_catalog::{Collector, FetchError, MemoryCatalog, RetryConfig};
use kiln_core::{Decision, EntityType, ErrorKind, ImportOutcome, MatchKind, SkipReason};
use kiln_db::ImportStore;
use kiln_db::repos::staging;
use kiln_formula::{Evaluator, HandlerRegistry, RuleStore};
use kiln_import::{CancellationToken, ImportError, ImportObserver, Orchestrator};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const RULES: &str = r#"
[config.entities.monster]
level_field = "level"
category_field = "race"
known_categories = [1]

[[rules]]
entity_type = "monster"
characteristic_key = "life"
source = "lifePoints"
formula_type = "expression"
expression_template = "[value] + [level]"
"#;

fn monster(id: u64, race: i64) -> Value {
    json!({
        "id": id,
        "name": { "fr": format!("Monstre {id}"), "en": format!("Monster {id}") },
        "race": race,
        "level": 10,
        "lifePoints": 30
    })
}

struct Harness {
    orchestrator: Orchestrator,
    catalog: Arc<MemoryCatalog>,
    store: Arc<ImportStore>,
}

async fn harness(catalog: MemoryCatalog, concurrency: usize) -> Harness {
    let store = ImportStore::open_in_memory().await.unwrap();
    harness_on(catalog, concurrency, store)
}

fn harness_on(catalog: MemoryCatalog, concurrency: usize, store: ImportStore) -> Harness {
    let registry = HandlerRegistry::builtin();
    let rules = Arc::new(RuleStore::from_toml_str(RULES, &registry).unwrap());
    let store = Arc::new(store);
    let catalog = Arc::new(catalog);
    let retry = RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
    };
    let collector = Collector::new(catalog.clone(), retry, Duration::from_secs(60));
    let orchestrator = Orchestrator::new(
        collector,
        rules,
        Evaluator::new(registry),
        Arc::clone(&store),
        concurrency,
    );
    Harness {
        orchestrator,
        catalog,
        store,
    }
}

fn catalog_with(ids: &[u64]) -> MemoryCatalog {
    ids.iter().fold(MemoryCatalog::new(), |catalog, &id| {
        catalog.with_record(EntityType::Monster, id, monster(id, 1))
    })
}

#[tokio::test]
async fn importing_twice_creates_then_updates() {
    let h = harness(catalog_with(&[7]), 1).await;

    let first = h.orchestrator.import_one(EntityType::Monster, 7).await;
    let ImportOutcome::Created { entity_id, review } = first else {
        panic!("expected created, got {first:?}");
    };
    assert!(!review);

    let second = h.orchestrator.import_one(EntityType::Monster, 7).await;
    assert_eq!(
        second,
        ImportOutcome::Updated {
            entity_id,
            matched: MatchKind::Exact,
            review: false
        }
    );

    assert_eq!(h.store.count_entities(None).await.unwrap(), 1);
    let stored = h.store.entity(entity_id).await.unwrap();
    assert_eq!(stored.name.as_deref(), Some("Monstre 7"));
    assert_eq!(stored.characteristics["life"], json!(40));
}

#[tokio::test]
async fn unknown_category_is_counted_and_flagged() {
    let catalog = MemoryCatalog::new().with_record(EntityType::Monster, 1, monster(1, 42));
    let h = harness(catalog, 1).await;

    let first = h.orchestrator.import_one(EntityType::Monster, 1).await;
    assert!(matches!(first, ImportOutcome::Created { review: true, .. }));
    let decision = h.store.type_decision(42).await.unwrap().unwrap();
    assert_eq!((decision.decision, decision.seen_count), (Decision::Pending, 1));

    h.orchestrator.import_one(EntityType::Monster, 1).await;
    let decision = h.store.type_decision(42).await.unwrap().unwrap();
    assert_eq!(decision.seen_count, 2);
    assert_eq!(h.store.count_type_decisions().await.unwrap(), 1);
}

#[tokio::test]
async fn blocked_category_is_skipped_without_writing() {
    let catalog = MemoryCatalog::new().with_record(EntityType::Monster, 1, monster(1, 42));
    let h = harness(catalog, 1).await;
    h.store
        .record_category_sighting(EntityType::Monster, 42)
        .await
        .unwrap();
    h.store.set_type_decision(42, Decision::Blocked).await.unwrap();

    let outcome = h.orchestrator.import_one(EntityType::Monster, 1).await;
    assert_eq!(
        outcome,
        ImportOutcome::skipped(SkipReason::BlockedCategory { category_id: 42 })
    );
    assert_eq!(h.store.count_entities(None).await.unwrap(), 0);
}

#[tokio::test]
async fn preview_never_writes() {
    let catalog = MemoryCatalog::new().with_record(EntityType::Monster, 1, monster(1, 42));
    let h = harness(catalog, 1).await;

    let first = h.orchestrator.preview(EntityType::Monster, 1).await.unwrap();
    for _ in 0..3 {
        let again = h.orchestrator.preview(EntityType::Monster, 1).await.unwrap();
        assert_eq!(again, first);
    }
    assert!(first.needs_review());
    assert_eq!(first.review.unwrap().seen_count, 0);
    assert_eq!(h.store.count_entities(None).await.unwrap(), 0);
    assert_eq!(h.store.count_type_decisions().await.unwrap(), 0);
}

#[tokio::test]
async fn preview_of_missing_record_is_a_fetch_error() {
    let h = harness(MemoryCatalog::new(), 1).await;
    let err = h.orchestrator.preview(EntityType::Monster, 5).await.unwrap_err();
    assert!(matches!(err, ImportError::Fetch(FetchError::NotFound { .. })));
}

#[tokio::test]
async fn one_failing_record_does_not_stop_the_batch() {
    let catalog = catalog_with(&[1, 3]);
    let mut broken = monster(2, 1);
    broken.as_object_mut().unwrap().remove("lifePoints");
    catalog.insert(EntityType::Monster, 2, broken);
    let h = harness(catalog, 2).await;

    let report = h
        .orchestrator
        .import_batch(EntityType::Monster, &[1, 2, 3], &CancellationToken::new())
        .await;

    let ids: Vec<u64> = report.records.iter().map(|r| r.external_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(matches!(report.outcome_for(1), Some(ImportOutcome::Created { .. })));
    assert!(matches!(
        report.outcome_for(2),
        Some(ImportOutcome::Failed {
            kind: ErrorKind::FormulaEvaluation,
            ..
        })
    ));
    assert!(matches!(report.outcome_for(3), Some(ImportOutcome::Created { .. })));
    assert_eq!(report.counts.failed, 1);
    assert!(report.has_failures());
}

#[tokio::test]
async fn range_skips_missing_ids_without_failing() {
    let h = harness(catalog_with(&[1, 3]), 2).await;

    let report = h
        .orchestrator
        .import_range(EntityType::Monster, 1..=4, &CancellationToken::new())
        .await;

    assert_eq!(report.counts.created, 2);
    assert_eq!(report.counts.skipped, 2);
    assert!(!report.has_failures());
    assert_eq!(
        report.outcome_for(4),
        Some(&ImportOutcome::skipped(SkipReason::NotFound))
    );
}

#[tokio::test]
async fn exhausted_transient_errors_fail_the_record() {
    let catalog = catalog_with(&[1]);
    for _ in 0..2 {
        catalog.fail_next(EntityType::Monster, 1, FetchError::Transient("503".into()));
    }
    let h = harness(catalog, 1).await;

    let outcome = h.orchestrator.import_one(EntityType::Monster, 1).await;
    assert!(matches!(
        outcome,
        ImportOutcome::Failed {
            kind: ErrorKind::Fetch,
            ..
        }
    ));
    assert_eq!(h.catalog.calls(), 2);
}

#[tokio::test]
async fn cancelled_before_start_reports_every_id() {
    let h = harness(catalog_with(&[1, 2, 3]), 2).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .orchestrator
        .import_batch(EntityType::Monster, &[1, 2, 3], &cancel)
        .await;

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.counts.skipped, 3);
    assert!(report.records.iter().all(|r| r.outcome
        == ImportOutcome::skipped(SkipReason::Cancelled)));
    assert_eq!(h.catalog.calls(), 0);
}

/// Cancels the run as soon as the first record finishes.
struct StopAfterFirst(CancellationToken);

impl ImportObserver for StopAfterFirst {
    fn record_finished(&self, _external_id: u64, _outcome: &ImportOutcome) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancellation_lets_in_flight_records_finish() {
    let h = harness(catalog_with(&[1, 2, 3, 4]), 1).await;
    let cancel = CancellationToken::new();
    let observer = StopAfterFirst(cancel.clone());

    let report = h
        .orchestrator
        .import_batch_with(EntityType::Monster, &[1, 2, 3, 4], &cancel, &observer)
        .await;

    assert!(matches!(report.outcome_for(1), Some(ImportOutcome::Created { .. })));
    for id in [2, 3, 4] {
        assert_eq!(
            report.outcome_for(id),
            Some(&ImportOutcome::skipped(SkipReason::Cancelled))
        );
    }
    assert_eq!(h.store.count_entities(None).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_workers_never_lose_triage_sightings() {
    let ids: Vec<u64> = (1..=8).collect();
    let catalog = ids.iter().fold(MemoryCatalog::new(), |catalog, &id| {
        catalog.with_record(EntityType::Monster, id, monster(id, 42))
    });
    let h = harness(catalog, 4).await;

    let report = h
        .orchestrator
        .import_batch(EntityType::Monster, &ids, &CancellationToken::new())
        .await;

    assert_eq!(report.counts.created, 8);
    let ordered: Vec<u64> = report.records.iter().map(|r| r.external_id).collect();
    assert_eq!(ordered, ids);
    let decision = h.store.type_decision(42).await.unwrap().unwrap();
    assert_eq!(decision.seen_count, 8);
}

#[tokio::test]
async fn malformed_category_skips_triage_but_stays_visible() {
    let mut record = monster(9, 1);
    record["race"] = json!("abc");
    let catalog = MemoryCatalog::new().with_record(EntityType::Monster, 9, record);
    let h = harness(catalog, 1).await;

    let preview = h.orchestrator.preview(EntityType::Monster, 9).await.unwrap();
    assert_eq!(preview.category_id, None);
    assert!(preview.field_errors.contains_key("race"));
    assert_eq!(preview.unclassified.get("race"), Some(&json!("abc")));

    let outcome = h.orchestrator.import_one(EntityType::Monster, 9).await;
    assert!(matches!(outcome, ImportOutcome::Created { review: false, .. }));
    assert_eq!(h.store.count_type_decisions().await.unwrap(), 0);
}

#[tokio::test]
async fn claim_held_by_another_process_blocks_the_duplicate_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.db");
    let path = path.to_str().unwrap();

    let running = ImportStore::open(path).await.unwrap();
    {
        let session = running.write_session().await;
        assert!(
            staging::claim(session.conn(), EntityType::Monster, "monstre 1")
                .await
                .unwrap()
        );
    }

    let h = harness_on(catalog_with(&[1]), 1, ImportStore::open(path).await.unwrap());
    let outcome = h.orchestrator.import_one(EntityType::Monster, 1).await;
    assert!(matches!(
        outcome,
        ImportOutcome::Failed {
            kind: ErrorKind::Integrity,
            ..
        }
    ));
    assert_eq!(h.store.count_entities(None).await.unwrap(), 0);
    assert_eq!(staging::count(running.db().conn()).await.unwrap(), 1);
}

/// Tracks how many records are started but not yet finished.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ImportObserver for InFlight {
    fn record_started(&self, _external_id: u64) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn record_finished(&self, _external_id: u64, _outcome: &ImportOutcome) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn range_runs_stay_bounded_and_ordered() {
    let present: Vec<u64> = (1..=60).filter(|id| id % 3 == 0).collect();
    let h = harness(catalog_with(&present), 3).await;
    let observer = InFlight::default();

    let report = h
        .orchestrator
        .import_range_with(EntityType::Monster, 1..=60, &CancellationToken::new(), &observer)
        .await;

    assert!(observer.peak.load(Ordering::SeqCst) <= 3);
    let ordered: Vec<u64> = report.records.iter().map(|r| r.external_id).collect();
    assert_eq!(ordered, (1..=60).collect::<Vec<_>>());
    assert_eq!(report.counts.created, 20);
    assert_eq!(report.counts.skipped, 40);
}
