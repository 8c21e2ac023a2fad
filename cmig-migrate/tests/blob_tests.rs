//! Integration tests for the audio asset pipeline
//!
//! manifest → transfer → apply final locations, against in-memory buckets and
//! a migrated target database.

mod helpers;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use cmig_common::artifact::read_json;
use cmig_migrate::blob::{
    apply_url_mappings, build_manifest, load_manifest, save_manifest, BlobMigrator, MemoryObjectStore,
    ObjectMeta, ObjectStore, StoreResult, MAX_ITEM_ATTEMPTS,
};
use cmig_migrate::db::cases::{fetch_case, load_case_targets_by_source, CaseTarget};
use cmig_migrate::models::ids::case_number_for;
use cmig_migrate::models::{BlobMigrationProgress, UrlMappingArtifact};
use cmig_migrate::utils::RetryPolicy;
use helpers::*;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PREFIX: &str = "recordings/";

fn legacy_bucket(ids: &[&str]) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new("legacy"));
    let created = Utc.with_ymd_and_hms(2025, 11, 1, 9, 0, 0).unwrap();
    for id in ids {
        store.insert(format!("{PREFIX}{id}.webm"), Bytes::from(format!("audio {id}")), "audio/webm", created);
    }
    store
}

fn doc_with_audio(id: &str, index: u32) -> serde_json::Value {
    let mut doc = case_doc(id, "202511-122188", index);
    doc["audio"] = json!({"uri": format!("mem://legacy/{PREFIX}{id}.webm"), "duration": 12.4});
    doc
}

fn migrator(source: Arc<dyn ObjectStore>, target: Arc<MemoryObjectStore>, state: &TempDir) -> BlobMigrator {
    BlobMigrator::new(
        source,
        target,
        RetryPolicy::new(1, Duration::ZERO),
        state.path().join("audio-progress.json"),
        state.path().join("audio-url-mappings.json"),
    )
}

fn cases_for(ids: &[&str]) -> HashMap<String, CaseTarget> {
    let created_at = Utc.with_ymd_and_hms(2025, 11, 1, 9, 0, 0).unwrap();
    ids.iter()
        .map(|id| (id.to_string(), CaseTarget { id: uuid::Uuid::new_v4(), created_at }))
        .collect()
}

/// Source bucket that notes, on every read of `watched`, how many failed
/// attempts the saved progress already holds for it
struct AttemptRecorder {
    inner: Arc<MemoryObjectStore>,
    watched: String,
    progress_path: PathBuf,
    seen: Mutex<Vec<u32>>,
}

impl AttemptRecorder {
    fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for AttemptRecorder {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn uri_for(&self, key: &str) -> String {
        self.inner.uri_for(key)
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.inner.list(prefix).await
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        if key == self.watched {
            let attempts = std::fs::read(&self.progress_path)
                .ok()
                .and_then(|raw| serde_json::from_slice::<BlobMigrationProgress>(&raw).ok())
                .map_or(0, |p| p.attempts_for(&self.inner.uri_for(key)));
            self.seen.lock().unwrap().push(attempts);
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StoreResult<()> {
        self.inner.put(key, data, content_type).await
    }
}

#[tokio::test]
async fn test_transient_failures_are_swept_until_success() {
    let (dir, pool) = create_test_db().await;
    let ids = ["A1", "A2", "A3"];
    let docs = ids.iter().enumerate().map(|(i, id)| doc_with_audio(id, i as u32)).collect();
    orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    let flaky = format!("{PREFIX}A2.webm");
    let legacy = legacy_bucket(&ids);
    legacy.fail_gets(flaky.clone(), 2);
    let source = Arc::new(AttemptRecorder {
        inner: legacy,
        watched: flaky.clone(),
        progress_path: dir.path().join("audio-progress.json"),
        seen: Mutex::new(Vec::new()),
    });
    let target = Arc::new(MemoryObjectStore::new("case-audio"));

    let cases = load_case_targets_by_source(&pool).await.unwrap();
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &cases)
        .await
        .unwrap();
    assert_eq!(manifest.total_files, 3);

    let progress = migrator(source.clone(), target.clone(), &dir)
        .migrate_all(&manifest, 5, None)
        .await
        .unwrap();

    // Main pass, then one sweep per failure; each sweep sees the count saved before it
    assert_eq!(source.seen(), vec![0, 1, 2]);
    assert!(source.seen().iter().all(|n| *n < MAX_ITEM_ATTEMPTS));

    assert_eq!(progress.success_count, 3);
    assert_eq!(progress.failed_count, 0);
    assert!(progress.failed_files.is_empty());
    assert_eq!(progress.url_mappings.len(), 3);
    assert_eq!(target.put_count(), 3);
}

#[tokio::test]
async fn test_rewound_resume_does_not_retry_exhausted_asset() {
    let state = TempDir::new().unwrap();
    let source = legacy_bucket(&["E1", "E2"]);
    let target = Arc::new(MemoryObjectStore::new("case-audio"));
    let broken = format!("{PREFIX}E1.webm");
    // Exactly enough failures to exhaust every attempt
    source.fail_gets(broken.clone(), MAX_ITEM_ATTEMPTS);
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &cases_for(&["E1", "E2"]))
        .await
        .unwrap();

    let first = migrator(source.clone(), target.clone(), &state)
        .migrate_all(&manifest, 2, None)
        .await
        .unwrap();
    assert_eq!(first.success_count, 1);
    assert_eq!(first.failed_files.len(), 1);
    assert_eq!(first.failed_files[0].uri, source.uri_for(&broken));
    assert_eq!(first.failed_files[0].retry_count, MAX_ITEM_ATTEMPTS);

    let again = migrator(source.clone(), target.clone(), &state)
        .migrate_all(&manifest, 2, Some(0))
        .await
        .unwrap();

    // The source would succeed now; an attempt would show up as a transfer
    assert_eq!(again.failed_files.len(), 1);
    assert_eq!(again.failed_files[0].retry_count, MAX_ITEM_ATTEMPTS);
    assert_eq!(again.success_count, 1);
    assert_eq!(again.skipped_count, 1);
    assert_eq!(target.put_count(), 1);
}

#[tokio::test]
async fn test_existing_assets_are_not_copied_again() {
    let state = TempDir::new().unwrap();
    let source = legacy_bucket(&["B1", "B2"]);
    let target = Arc::new(MemoryObjectStore::new("case-audio"));
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &cases_for(&["B1", "B2"]))
        .await
        .unwrap();

    let first = migrator(source.clone(), target.clone(), &state)
        .migrate_all(&manifest, 2, None)
        .await
        .unwrap();
    assert_eq!(first.success_count, 2);

    // Fresh progress, same target: every object is already there
    std::fs::remove_file(state.path().join("audio-progress.json")).unwrap();
    let second = migrator(source.clone(), target.clone(), &state)
        .migrate_all(&manifest, 2, None)
        .await
        .unwrap();

    assert_eq!(second.success_count, 0);
    assert_eq!(second.skipped_count, 2);
    assert_eq!(second.url_mappings.len(), 2);
    assert_eq!(target.put_count(), 2);
}

#[tokio::test]
async fn test_assets_without_case_are_skipped() {
    let state = TempDir::new().unwrap();
    let source = legacy_bucket(&["ORPHAN"]);
    let target = Arc::new(MemoryObjectStore::new("case-audio"));
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &Default::default())
        .await
        .unwrap();

    let progress = migrator(source, target.clone(), &state)
        .migrate_all(&manifest, 2, None)
        .await
        .unwrap();

    assert_eq!(progress.skipped_count, 1);
    assert!(progress.url_mappings.is_empty());
    assert_eq!(target.put_count(), 0);
}

#[tokio::test]
async fn test_manifest_survives_restart_and_resume_index_applies() {
    let state = TempDir::new().unwrap();
    let source = legacy_bucket(&["C1", "C2", "C3"]);
    let target = Arc::new(MemoryObjectStore::new("case-audio"));
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &cases_for(&["C1", "C2", "C3"]))
        .await
        .unwrap();
    let manifest_path = state.path().join("audio-manifest.json");
    save_manifest(&manifest_path, &manifest).await.unwrap();
    let reloaded = load_manifest(&manifest_path).await.unwrap().unwrap();
    assert_eq!(reloaded, manifest);

    let progress = migrator(source, target.clone(), &state)
        .migrate_all(&reloaded, 1, Some(2))
        .await
        .unwrap();

    assert_eq!(progress.last_processed_index, 3);
    assert_eq!(progress.success_count, 1);
    assert_eq!(target.put_count(), 1);
}

#[tokio::test]
async fn test_apply_urls_is_rerunnable() {
    let (dir, pool) = create_test_db().await;
    let ids = ["D1", "D2"];
    let docs = ids.iter().enumerate().map(|(i, id)| doc_with_audio(id, i as u32)).collect();
    orchestrator(&pool, dir.path(), docs, test_options(dir.path()))
        .await
        .run(None)
        .await
        .unwrap();

    let source = legacy_bucket(&ids);
    let target = Arc::new(MemoryObjectStore::new("case-audio"));
    let cases = load_case_targets_by_source(&pool).await.unwrap();
    let manifest = build_manifest(source.as_ref(), &[PREFIX.to_string()], &cases)
        .await
        .unwrap();
    migrator(source, target.clone(), &dir)
        .migrate_all(&manifest, 2, None)
        .await
        .unwrap();

    let artifact: UrlMappingArtifact = read_json(&dir.path().join("audio-url-mappings.json"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.total_mappings, 2);

    let base = target.uri_for("");
    let policy = RetryPolicy::new(1, Duration::ZERO);

    let first = apply_url_mappings(&pool, &artifact, &base, &policy, false).await.unwrap();
    assert_eq!(first.updated, 2);

    let case = fetch_case(&pool, &case_number_for("D1")).await.unwrap().unwrap();
    let audio_url = case.audio_url.unwrap();
    assert!(audio_url.starts_with(&base), "{audio_url}");
    assert!(audio_url.ends_with(&format!("{}.webm", case.id)));

    let second = apply_url_mappings(&pool, &artifact, &base, &policy, false).await.unwrap();
    assert_eq!(second.updated, 0);
    assert_eq!(second.already_final, 2);
}
