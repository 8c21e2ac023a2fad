//! Blob transfer
//!
//! Entries are copied in fixed-size concurrent batches. A batch is awaited
//! with a settle-all join so one failing item never cancels its neighbours;
//! progress counters are updated only after the join and then written
//! atomically, so a kill at any point resumes from the last finished batch.

use super::manifest::{content_type_for_extension, extension_of, FALLBACK_CONTENT_TYPE};
use super::store::ObjectStore;
use super::{StoreError, StoreResult};
use crate::error::{MigrationError, MigrationResult};
use crate::models::{
    BlobManifest, BlobManifestEntry, BlobMigrationProgress, UrlMapping, UrlMappingArtifact,
};
use crate::utils::{with_retry, RetryPolicy};
use chrono::Datelike;
use cmig_common::artifact::{read_json, write_json_atomic};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Attempts per manifest entry before it is left in the failed bucket
pub const MAX_ITEM_ATTEMPTS: u32 = 3;

/// Outcome of one successful `migrate_one`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Object was copied (or would be, in a dry run)
    Uploaded { target_uri: String },
    /// Object already existed at the target key; nothing was copied
    AlreadyPresent { target_uri: String },
}

impl Transfer {
    pub fn target_uri(&self) -> &str {
        match self {
            Transfer::Uploaded { target_uri } | Transfer::AlreadyPresent { target_uri } => target_uri,
        }
    }
}

/// Target key for an entry: `cases/<YYYY>/<MM>/<target-case-id>.<ext>`
///
/// `None` when the entry has no target case.
pub fn target_key_for(entry: &BlobManifestEntry) -> Option<String> {
    let case_id = entry.target_case_id?;
    let ext = extension_of(&entry.path)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| extension_for_content_type(&entry.content_type).to_string());
    Some(format!(
        "cases/{:04}/{:02}/{}.{}",
        entry.created_at.year(),
        entry.created_at.month(),
        case_id,
        ext
    ))
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "audio/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",
        "audio/flac" => "flac",
        _ => "bin",
    }
}

enum ItemOutcome {
    Done(Transfer),
    Failed(StoreError),
    NoTarget,
}

pub struct BlobMigrator {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    progress_path: PathBuf,
    mapping_path: PathBuf,
    dry_run: bool,
}

impl BlobMigrator {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        policy: RetryPolicy,
        progress_path: impl Into<PathBuf>,
        mapping_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            target,
            policy,
            progress_path: progress_path.into(),
            mapping_path: mapping_path.into(),
            dry_run: false,
        }
    }

    /// Plan only: existence checks run, nothing is copied or persisted
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Copy one manifest entry to its target key
    ///
    /// An object already at the target key is not copied again. Remote calls
    /// go through the retry policy.
    pub async fn migrate_one(&self, entry: &BlobManifestEntry) -> StoreResult<Transfer> {
        let key = target_key_for(entry)
            .ok_or_else(|| StoreError::InvalidKey(format!("{} has no target case", entry.uri)))?;
        let target_uri = self.target.uri_for(&key);

        let existing = with_retry("blob_head", &self.policy, StoreError::is_transient, || {
            self.target.head(&key)
        })
        .await?;
        if existing.is_some() {
            debug!(uri = %entry.uri, key = %key, "Already present at target");
            return Ok(Transfer::AlreadyPresent { target_uri });
        }

        if self.dry_run {
            return Ok(Transfer::Uploaded { target_uri });
        }

        let data = with_retry("blob_download", &self.policy, StoreError::is_transient, || {
            self.source.get(&entry.path)
        })
        .await?;

        let content_type = if entry.content_type.is_empty() || entry.content_type == FALLBACK_CONTENT_TYPE {
            infer::get(&data)
                .map(|kind| kind.mime_type().to_string())
                .unwrap_or_else(|| {
                    content_type_for_extension(extension_of(&entry.path).unwrap_or_default()).to_string()
                })
        } else {
            entry.content_type.clone()
        };

        with_retry("blob_upload", &self.policy, StoreError::is_transient, || {
            self.target.put(&key, data.clone(), &content_type)
        })
        .await?;

        debug!(uri = %entry.uri, key = %key, bytes = data.len(), "Uploaded");
        Ok(Transfer::Uploaded { target_uri })
    }

    async fn run_batch<'a>(
        &self,
        entries: &[&'a BlobManifestEntry],
    ) -> Vec<(&'a BlobManifestEntry, ItemOutcome)> {
        let futures = entries.iter().map(|&entry| async move {
            let outcome = if entry.target_case_id.is_none() {
                ItemOutcome::NoTarget
            } else {
                match self.migrate_one(entry).await {
                    Ok(transfer) => ItemOutcome::Done(transfer),
                    Err(e) => ItemOutcome::Failed(e),
                }
            };
            (entry, outcome)
        });
        join_all(futures).await
    }

    fn apply(progress: &mut BlobMigrationProgress, entry: &BlobManifestEntry, outcome: ItemOutcome) {
        match (outcome, entry.target_case_id) {
            (ItemOutcome::NoTarget, _) | (_, None) => {
                progress.skipped_count += 1;
            }
            (ItemOutcome::Done(transfer), Some(case_id)) => {
                let mapping = UrlMapping {
                    target_case_id: case_id,
                    source_uri: entry.uri.clone(),
                    target_uri: transfer.target_uri().to_string(),
                };
                match transfer {
                    Transfer::Uploaded { .. } => progress.record_success(mapping),
                    Transfer::AlreadyPresent { .. } => progress.record_existing(mapping),
                }
            }
            (ItemOutcome::Failed(err), Some(case_id)) => {
                let retry_count = progress.record_failure(&entry.uri, Some(case_id), err.to_string());
                if retry_count >= MAX_ITEM_ATTEMPTS {
                    warn!(uri = %entry.uri, retry_count, error = %err, "Asset permanently failed");
                } else {
                    warn!(uri = %entry.uri, retry_count, error = %err, "Asset failed, queued for retry");
                }
            }
        }
    }

    async fn load_progress(&self) -> MigrationResult<BlobMigrationProgress> {
        let progress: Option<BlobMigrationProgress> = read_json(&self.progress_path).await.map_err(|e| {
            MigrationError::State(format!(
                "blob progress {} is unreadable ({})",
                self.progress_path.display(),
                e
            ))
        })?;
        Ok(progress.unwrap_or_default())
    }

    async fn save_progress(&self, progress: &mut BlobMigrationProgress) -> MigrationResult<()> {
        progress.touch();
        if !self.dry_run {
            write_json_atomic(&self.progress_path, progress).await?;
        }
        Ok(())
    }

    /// Copy every manifest entry from `resume_from` (or the saved position)
    ///
    /// After the main pass, entries in the failed bucket with fewer than
    /// [`MAX_ITEM_ATTEMPTS`] attempts are swept again until none remain. The
    /// url-mapping artifact is written at the end.
    pub async fn migrate_all(
        &self,
        manifest: &BlobManifest,
        concurrency: usize,
        resume_from: Option<usize>,
    ) -> MigrationResult<BlobMigrationProgress> {
        let concurrency = concurrency.max(1);
        let mut progress = self.load_progress().await?;
        if let Some(index) = resume_from {
            progress.last_processed_index = index;
        }
        let start_index = progress.last_processed_index.min(manifest.files.len());
        let total = manifest.files.len();
        let started = Instant::now();

        info!(
            total,
            start_index,
            concurrency,
            dry_run = self.dry_run,
            "Starting blob migration"
        );

        let remaining: Vec<&BlobManifestEntry> = manifest.files[start_index..].iter().collect();
        for batch in remaining.chunks(concurrency) {
            // A rewound resume index must not push exhausted items past the cap
            let (exhausted, pending): (Vec<&BlobManifestEntry>, Vec<&BlobManifestEntry>) = batch
                .iter()
                .copied()
                .partition(|entry| progress.attempts_for(&entry.uri) >= MAX_ITEM_ATTEMPTS);
            for entry in exhausted {
                debug!(uri = %entry.uri, "Permanently failed, not retried");
            }

            let results = self.run_batch(&pending).await;
            for (entry, outcome) in results {
                Self::apply(&mut progress, entry, outcome);
            }
            progress.last_processed_index += batch.len();
            self.save_progress(&mut progress).await?;

            let done = progress.last_processed_index;
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { (done - start_index) as f64 / elapsed } else { 0.0 };
            info!(
                processed = done,
                total,
                succeeded = progress.success_count,
                skipped = progress.skipped_count,
                failed = progress.failed_files.len(),
                rate = format!("{:.1}/s", rate),
                "Blob batch complete"
            );
        }

        let by_uri: HashMap<&str, &BlobManifestEntry> =
            manifest.files.iter().map(|f| (f.uri.as_str(), f)).collect();

        loop {
            let retryable: Vec<&BlobManifestEntry> = progress
                .failed_files
                .iter()
                .filter(|f| f.retry_count < MAX_ITEM_ATTEMPTS)
                .filter_map(|f| by_uri.get(f.uri.as_str()).copied())
                .collect();
            if retryable.is_empty() {
                break;
            }

            info!(count = retryable.len(), "Retrying failed assets");
            for batch in retryable.chunks(concurrency) {
                let results = self.run_batch(batch).await;
                for (entry, outcome) in results {
                    Self::apply(&mut progress, entry, outcome);
                }
                self.save_progress(&mut progress).await?;
            }
        }

        if !self.dry_run {
            let artifact = UrlMappingArtifact::new(progress.url_mappings.clone());
            write_json_atomic(&self.mapping_path, &artifact).await?;
        }

        info!(
            succeeded = progress.success_count,
            skipped = progress.skipped_count,
            failed = progress.failed_count,
            mappings = progress.url_mappings.len(),
            elapsed_s = started.elapsed().as_secs(),
            "Blob migration finished"
        );

        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryObjectStore;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn entry(store: &MemoryObjectStore, key: &str, case_id: Option<Uuid>) -> BlobManifestEntry {
        BlobManifestEntry {
            uri: store.uri_for(key),
            path: key.to_string(),
            size_bytes: 4,
            content_type: "audio/webm".into(),
            created_at: Utc.with_ymd_and_hms(2025, 11, 2, 8, 0, 0).unwrap(),
            target_case_id: case_id,
        }
    }

    fn migrator(source: Arc<MemoryObjectStore>, target: Arc<MemoryObjectStore>, dir: &TempDir) -> BlobMigrator {
        BlobMigrator::new(
            source,
            target,
            RetryPolicy::new(1, Duration::ZERO),
            dir.path().join("audio-progress.json"),
            dir.path().join("audio-url-mappings.json"),
        )
    }

    #[test]
    fn test_target_key_layout() {
        let store = MemoryObjectStore::new("legacy");
        let case_id = Uuid::new_v4();
        let e = entry(&store, "recordings/S1.WEBM", Some(case_id));
        assert_eq!(target_key_for(&e), Some(format!("cases/2025/11/{case_id}.webm")));

        let mut no_ext = entry(&store, "recordings/S1", Some(case_id));
        no_ext.content_type = "audio/mpeg".into();
        assert_eq!(target_key_for(&no_ext), Some(format!("cases/2025/11/{case_id}.mp3")));

        assert_eq!(target_key_for(&entry(&store, "recordings/S1.webm", None)), None);
    }

    #[tokio::test]
    async fn test_second_call_does_not_transfer() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryObjectStore::new("legacy"));
        let target = Arc::new(MemoryObjectStore::new("case-audio"));
        source.insert("recordings/S1.webm", Bytes::from_static(b"webm"), "audio/webm", Utc::now());
        let m = migrator(source.clone(), target.clone(), &dir);
        let e = entry(&source, "recordings/S1.webm", Some(Uuid::new_v4()));

        let first = m.migrate_one(&e).await.unwrap();
        let second = m.migrate_one(&e).await.unwrap();

        assert!(matches!(first, Transfer::Uploaded { .. }));
        assert!(matches!(second, Transfer::AlreadyPresent { .. }));
        assert_eq!(first.target_uri(), second.target_uri());
        assert_eq!(target.put_count(), 1);
        assert_eq!(source.get_count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_copies_nothing() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryObjectStore::new("legacy"));
        let target = Arc::new(MemoryObjectStore::new("case-audio"));
        source.insert("recordings/S1.webm", Bytes::from_static(b"webm"), "audio/webm", Utc::now());
        let m = migrator(source.clone(), target.clone(), &dir).with_dry_run(true);
        let manifest = BlobManifest::new("legacy", vec![entry(&source, "recordings/S1.webm", Some(Uuid::new_v4()))]);

        let progress = m.migrate_all(&manifest, 5, None).await.unwrap();
        assert_eq!(progress.success_count, 1);
        assert_eq!(target.put_count(), 0);
        assert!(!dir.path().join("audio-progress.json").exists());
        assert!(!dir.path().join("audio-url-mappings.json").exists());
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_after_cap() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemoryObjectStore::new("legacy"));
        let target = Arc::new(MemoryObjectStore::new("case-audio"));
        source.insert("recordings/S1.webm", Bytes::from_static(b"webm"), "audio/webm", Utc::now());
        source.fail_gets("recordings/S1.webm", 10);
        let m = migrator(source.clone(), target.clone(), &dir);
        let manifest = BlobManifest::new("legacy", vec![entry(&source, "recordings/S1.webm", Some(Uuid::new_v4()))]);

        let progress = m.migrate_all(&manifest, 2, None).await.unwrap();
        assert_eq!(progress.success_count, 0);
        assert_eq!(progress.failed_count, 1);
        assert_eq!(progress.failed_files[0].retry_count, MAX_ITEM_ATTEMPTS);
    }
}
