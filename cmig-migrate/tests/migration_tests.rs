//! Integration tests for the entity migration phases
//!
//! Covers deduplication, resume, idempotence, dry run and phase ordering
//! against a file-backed target database.

mod helpers;

use cmig_migrate::db::{accounts, analyses, cases};
use cmig_migrate::identity::{ActorCache, ActorResolver, SERVICE_ACCOUNT};
use cmig_migrate::models::ids::{account_id_for, case_number_for};
use cmig_migrate::models::{Phase, PhaseState, RecordErrorKind, ORIGIN_MIGRATION};
use cmig_migrate::{CheckpointStore, MigrationError, MigrationOrchestrator};
use helpers::*;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_full_run_migrates_validates_and_clears_checkpoint() {
    let (dir, pool) = create_test_db().await;
    let mut orchestrator = orchestrator(&pool, dir.path(), case_docs(25, 10), test_options(dir.path())).await;

    let report = orchestrator.run(None).await.unwrap();

    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(count_rows(&pool, "accounts").await, 10);
    assert_eq!(count_rows(&pool, "cases").await, 25);
    assert_eq!(count_rows(&pool, "analyses").await, 13);

    let validation = report.validation.as_ref().unwrap();
    assert!(validation.passed());
    assert_eq!(validation.check("case_count").unwrap().actual, "25");

    assert_eq!(report.phase(Phase::Cases).unwrap().counters.created, 25);
    assert!(!checkpoint_path(dir.path()).exists());
    assert!(dir.path().join("migration-report.json").exists());
}

#[tokio::test]
async fn test_dash_variants_collapse_into_one_account() {
    let (dir, pool) = create_test_db().await;
    let docs = vec![
        case_doc("M202511-IC004", "202511\u{2010}122188", 1),
        case_doc("M202511-IC005", "202511-122188", 2),
    ];
    let mut orchestrator = orchestrator(&pool, dir.path(), docs, test_options(dir.path())).await;

    let report = orchestrator.run(None).await.unwrap();
    assert!(report.is_success());

    assert_eq!(count_rows(&pool, "accounts").await, 1);
    let account_id = accounts::find_account_id(&pool, "202511-122188").await.unwrap();
    assert_eq!(account_id, Some(account_id_for("202511-122188")));

    for source_id in ["M202511-IC004", "M202511-IC005"] {
        let link = cases::find_case_link(&pool, &case_number_for(source_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(link.account_id), account_id);
    }
}

#[tokio::test]
async fn test_rerun_creates_nothing_new() {
    let (dir, pool) = create_test_db().await;
    let docs = case_docs(25, 10);

    let first = orchestrator(&pool, dir.path(), docs.clone(), test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();
    assert!(first.is_success());

    let second = orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();
    assert!(second.is_success());

    for (phase, existing) in [(Phase::Accounts, 10), (Phase::Cases, 25), (Phase::Analyses, 13)] {
        let counters = second.phase(phase).unwrap().counters;
        assert_eq!(counters.created, 0, "{phase}");
        assert_eq!(counters.existing, existing, "{phase}");
    }
    assert_eq!(count_rows(&pool, "accounts").await, 10);
    assert_eq!(count_rows(&pool, "cases").await, 25);
    assert_eq!(count_rows(&pool, "analyses").await, 13);
}

#[tokio::test]
async fn test_dry_run_writes_nothing_and_predicts_counters() {
    let (dir, pool) = create_test_db().await;
    let docs = case_docs(25, 10);

    let mut options = test_options(dir.path());
    options.dry_run = true;
    let planned = orchestrator(&pool, dir.path(), docs.clone(), options)
        .await
        .run(None)
        .await
        .unwrap();

    assert!(planned.dry_run);
    assert!(planned.is_success());
    assert_eq!(count_rows(&pool, "accounts").await, 0);
    assert_eq!(count_rows(&pool, "cases").await, 0);
    assert_eq!(count_rows(&pool, "analyses").await, 0);
    assert!(!checkpoint_path(dir.path()).exists());

    let real = orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    for phase in [Phase::Accounts, Phase::Cases, Phase::Analyses] {
        assert_eq!(
            planned.phase(phase).unwrap().counters,
            real.phase(phase).unwrap().counters,
            "{phase}"
        );
    }
}

#[tokio::test]
async fn test_single_phase_requires_its_prerequisite() {
    let (dir, pool) = create_test_db().await;
    let mut orchestrator = orchestrator(&pool, dir.path(), case_docs(5, 2), test_options(dir.path())).await;

    let err = orchestrator.run(Some(Phase::Cases)).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::PhaseOrder {
            phase: Phase::Cases,
            requires: Phase::Accounts
        }
    ));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(count_rows(&pool, "cases").await, 0);
}

#[tokio::test]
async fn test_resume_after_interruption_matches_uninterrupted_run() {
    let docs = case_docs(25, 10);

    // Uninterrupted reference run
    let (ref_dir, ref_pool) = create_test_db().await;
    orchestrator(&ref_pool, ref_dir.path(), docs.clone(), test_options(ref_dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    let (dir, pool) = create_test_db().await;
    orchestrator(&pool, dir.path(), docs.clone(), test_options(dir.path()))
        .await
        .run(Some(Phase::Accounts))
        .await
        .unwrap();

    // Two batches of cases land, then the process dies before the third
    orchestrator(&pool, dir.path(), docs[..20].to_vec(), test_options(dir.path()))
        .await
        .run(Some(Phase::Cases))
        .await
        .unwrap();
    let mut store = CheckpointStore::new(checkpoint_path(dir.path()));
    let mut checkpoint = store.load().await.unwrap().unwrap();
    checkpoint.completed_phases.retain(|p| *p != Phase::Cases);
    store.save(&checkpoint).await.unwrap();
    assert_eq!(checkpoint.state_of(Phase::Cases), PhaseState::InProgress);
    assert_eq!(checkpoint.last_processed(Phase::Cases), Some("S0019"));

    let resumed = orchestrator(&pool, dir.path(), docs.clone(), test_options(dir.path()))
        .await
        .run(Some(Phase::Cases))
        .await
        .unwrap();
    let cases_report = resumed.phase(Phase::Cases).unwrap();
    assert_eq!(cases_report.resumed_at, 20);
    assert_eq!(cases_report.counters.processed, 5);
    assert_eq!(cases_report.counters.created, 5);

    for phase in [Phase::Analyses, Phase::Validate] {
        let report = orchestrator(&pool, dir.path(), docs.clone(), test_options(dir.path()))
            .await
            .run(Some(phase))
            .await
            .unwrap();
        assert!(report.is_success(), "{phase}: {:?}", report.errors);
    }

    assert_eq!(
        cases::load_migrated_case_numbers(&pool).await.unwrap(),
        cases::load_migrated_case_numbers(&ref_pool).await.unwrap()
    );
    assert_eq!(
        analyses::load_migrated_analysis_sources(&pool).await.unwrap(),
        analyses::load_migrated_analysis_sources(&ref_pool).await.unwrap()
    );
    assert_eq!(
        accounts::load_migrated_customer_numbers(&pool).await.unwrap(),
        accounts::load_migrated_customer_numbers(&ref_pool).await.unwrap()
    );
}

#[tokio::test]
async fn test_record_without_customer_is_skipped_not_failed() {
    let (dir, pool) = create_test_db().await;
    let mut docs = case_docs(4, 2);
    docs.push(json!({"id": "NO-CUSTOMER", "createdAt": "2025-11-03T00:00:00Z"}));

    let report = orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.phase(Phase::Cases).unwrap().counters.skipped, 1);
    assert!(report
        .errors
        .iter()
        .any(|e| e.source_id == "NO-CUSTOMER" && e.kind == RecordErrorKind::DataShape));
    assert_eq!(count_rows(&pool, "cases").await, 4);
}

#[tokio::test]
async fn test_case_without_account_fails_and_phase_restarts() {
    let (dir, pool) = create_test_db().await;
    let docs = case_docs(4, 2);

    orchestrator(&pool, dir.path(), docs.clone(), test_options(dir.path()))
        .await
        .run(Some(Phase::Accounts))
        .await
        .unwrap();

    let mut with_newcomer = docs;
    with_newcomer.push(case_doc("LATE-1", "202511-9999", 500));
    let report = orchestrator(&pool, dir.path(), with_newcomer, test_options(dir.path()))
        .await
        .run(Some(Phase::Cases))
        .await
        .unwrap();

    assert!(!report.is_success());
    let failure = report.errors.iter().find(|e| e.source_id == "LATE-1").unwrap();
    assert_eq!(failure.kind, RecordErrorKind::Integrity);
    assert_eq!(report.phase(Phase::Cases).unwrap().counters.created, 4);

    let checkpoint = CheckpointStore::new(checkpoint_path(dir.path()))
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.state_of(Phase::Cases), PhaseState::Pending);
    assert!(checkpoint.is_complete(Phase::Accounts));
}

#[tokio::test]
async fn test_corrupt_checkpoint_stops_the_run() {
    let (dir, pool) = create_test_db().await;
    std::fs::write(checkpoint_path(dir.path()), "{ not json").unwrap();

    let err = orchestrator(&pool, dir.path(), case_docs(3, 1), test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::State(_)));
    assert_eq!(count_rows(&pool, "accounts").await, 0);
}

#[tokio::test]
async fn test_unknown_actors_fall_back_to_service_account() {
    let (dir, pool) = create_test_db().await;
    let state = TempDir::new().unwrap();
    let mut orchestrator = MigrationOrchestrator::new(
        pool.clone(),
        test_options(state.path()),
        source(case_docs(6, 3)).await,
        ActorResolver::with_cache_only(ActorCache::new()),
        CheckpointStore::new(checkpoint_path(dir.path())),
        "test-operator",
    );

    let report = orchestrator.run(None).await.unwrap();

    // Fallback ownership is a warning, not a failure
    assert!(report.is_success());
    let validation = report.validation.as_ref().unwrap();
    let ratio = validation.check("service_account_ratio").unwrap();
    assert!(!ratio.passed);
    assert_eq!(validation.warnings().count(), 1);

    let owned = accounts::count_migrated_accounts_owned_by(&pool, SERVICE_ACCOUNT)
        .await
        .unwrap();
    assert_eq!(owned, accounts::count_accounts(&pool, Some(ORIGIN_MIGRATION)).await.unwrap());
}

#[tokio::test]
async fn test_dry_run_with_file_store_leaves_real_run_untouched() {
    let (dir, pool) = create_test_db().await;
    let docs = case_docs(25, 10);

    let mut options = test_options(dir.path());
    options.dry_run = true;
    let planned = MigrationOrchestrator::new(
        pool.clone(),
        options,
        source(docs.clone()).await,
        resolver(),
        CheckpointStore::new(checkpoint_path(dir.path())),
        "test-operator",
    )
    .run(None)
    .await
    .unwrap();
    assert!(planned.is_success());
    assert!(!checkpoint_path(dir.path()).exists());

    let real = orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    assert!(real.is_success());
    assert!(!real.phase(Phase::Cases).unwrap().already_complete);
    assert_eq!(real.phase(Phase::Cases).unwrap().counters.created, 25);
    assert_eq!(count_rows(&pool, "accounts").await, 10);
    assert_eq!(count_rows(&pool, "cases").await, 25);
    assert_eq!(count_rows(&pool, "analyses").await, 13);
}
