//! Test Helper Utilities
//!
//! Shared setup for cmig-migrate integration tests

#![allow(dead_code)]

use cmig_migrate::db::init_database_pool;
use cmig_migrate::identity::{ActorCache, ActorResolver};
use cmig_migrate::source::{load_source_records, SourceLoad, StaticSource};
use cmig_migrate::utils::RetryPolicy;
use cmig_migrate::{CheckpointStore, MigrationOrchestrator, OrchestratorOptions};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Profile id every test actor resolves to
pub const SALES_PROFILE: &str = "profile-sales-1";

/// File-backed target database in a temp dir
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("target.db")).await.unwrap();
    (dir, pool)
}

/// Source document for one case
///
/// `index` spreads creation times so the source order is predictable.
pub fn case_doc(id: &str, customer: &str, index: u32) -> Value {
    json!({
        "id": id,
        "customerId": customer,
        "customerName": format!("Customer {customer}"),
        "lineUserId": "U-sales-1",
        "unit": "Solar",
        "status": "contacted",
        "type": "call",
        "summary": format!("Call {id}"),
        "transcript": [
            {"speaker": "sales", "text": "Hello", "start": 0.0, "end": 1.5}
        ],
        "createdAt": format!("2025-11-01T{:02}:{:02}:00Z", index / 60 % 24, index % 60),
    })
}

/// Source document with an analysis attached
pub fn case_doc_with_analysis(id: &str, customer: &str, index: u32) -> Value {
    let mut doc = case_doc(id, customer, index);
    doc["analysis"] = json!({
        "decisionMaker": "yes",
        "overallScore": 72.5,
        "summary": "Interested",
        "metrics": {"score": 3},
        "pain": {"score": 4, "notes": "bill too high"}
    });
    doc
}

/// `count` documents spread over `accounts` customers
pub fn case_docs(count: u32, accounts: u32) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let id = format!("S{i:04}");
            let customer = format!("202511-{:04}", i % accounts);
            if i % 2 == 0 {
                case_doc_with_analysis(&id, &customer, i)
            } else {
                case_doc(&id, &customer, i)
            }
        })
        .collect()
}

pub async fn source(docs: Vec<Value>) -> SourceLoad {
    load_source_records(&StaticSource::new(docs)).await.unwrap()
}

/// Resolver that knows the single test actor
pub fn resolver() -> ActorResolver {
    ActorResolver::with_cache_only(ActorCache::from_pairs([("U-sales-1", SALES_PROFILE)]))
}

/// Small batches, no delays, single-attempt writes
pub fn test_options(state_dir: &Path) -> OrchestratorOptions {
    OrchestratorOptions {
        batch_size: 10,
        batch_delay: Duration::ZERO,
        dry_run: false,
        sample_size: 50,
        retry: RetryPolicy::new(1, Duration::ZERO),
        report_path: Some(state_dir.join("migration-report.json")),
    }
}

pub fn checkpoint_path(state_dir: &Path) -> PathBuf {
    state_dir.join("checkpoint.json")
}

pub async fn orchestrator(
    pool: &SqlitePool,
    state_dir: &Path,
    docs: Vec<Value>,
    options: OrchestratorOptions,
) -> MigrationOrchestrator {
    let store = if options.dry_run {
        CheckpointStore::memory_only(checkpoint_path(state_dir))
    } else {
        CheckpointStore::new(checkpoint_path(state_dir))
    };
    MigrationOrchestrator::new(pool.clone(), options, source(docs).await, resolver(), store, "test-operator")
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}
