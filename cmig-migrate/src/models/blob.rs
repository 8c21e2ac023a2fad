//! Blob migration artifacts: manifest, progress, url mappings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Enumerated listing of source assets, persisted before any transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobManifest {
    pub exported_at: DateTime<Utc>,
    pub bucket: String,
    pub total_files: usize,
    pub total_size_bytes: u64,
    /// Content type → file count
    pub format_summary: BTreeMap<String, usize>,
    pub files: Vec<BlobManifestEntry>,
}

impl BlobManifest {
    pub fn new(bucket: impl Into<String>, files: Vec<BlobManifestEntry>) -> Self {
        let mut format_summary = BTreeMap::new();
        for file in &files {
            *format_summary.entry(file.content_type.clone()).or_insert(0) += 1;
        }
        Self {
            exported_at: Utc::now(),
            bucket: bucket.into(),
            total_files: files.len(),
            total_size_bytes: files.iter().map(|f| f.size_bytes).sum(),
            format_summary,
            files,
        }
    }
}

/// One source asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobManifestEntry {
    /// Full source location (`<scheme>://<bucket>/<path>`)
    pub uri: String,
    /// Object key inside the source store
    pub path: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    /// Case the asset belongs to; None when the path could not be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_case_id: Option<Uuid>,
}

/// Item that failed to transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub uri: String,
    pub target_case_id: Option<Uuid>,
    pub error: String,
    /// Failed attempts so far
    pub retry_count: u32,
}

/// Final location of one case's audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMapping {
    pub target_case_id: Uuid,
    pub source_uri: String,
    pub target_uri: String,
}

/// Blob transfer progress (resumable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMigrationProgress {
    /// Manifest index the main pass will continue from
    pub last_processed_index: usize,
    pub success_count: u64,
    /// Items currently in `failed_files`
    pub failed_count: u64,
    pub skipped_count: u64,
    pub failed_files: Vec<FailedFile>,
    pub url_mappings: Vec<UrlMapping>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BlobMigrationProgress {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            last_processed_index: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            failed_files: Vec::new(),
            url_mappings: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }
}

impl BlobMigrationProgress {
    /// Record a finished transfer; clears any earlier failure for the same uri
    pub fn record_success(&mut self, mapping: UrlMapping) {
        self.success_count += 1;
        self.failed_files.retain(|f| f.uri != mapping.source_uri);
        self.push_mapping(mapping);
    }

    /// Record an asset that was already present at its target location
    pub fn record_existing(&mut self, mapping: UrlMapping) {
        self.skipped_count += 1;
        self.failed_files.retain(|f| f.uri != mapping.source_uri);
        self.push_mapping(mapping);
    }

    /// Record a failed attempt and return the item's new retry count
    pub fn record_failure(&mut self, uri: &str, target_case_id: Option<Uuid>, error: String) -> u32 {
        let retry_count = match self.failed_files.iter_mut().find(|f| f.uri == uri) {
            Some(existing) => {
                existing.retry_count += 1;
                existing.error = error;
                existing.retry_count
            }
            None => {
                self.failed_files.push(FailedFile {
                    uri: uri.to_string(),
                    target_case_id,
                    error,
                    retry_count: 1,
                });
                1
            }
        };
        self.failed_count = self.failed_files.len() as u64;
        retry_count
    }

    /// Failed attempts recorded so far for `uri`
    pub fn attempts_for(&self, uri: &str) -> u32 {
        self.failed_files
            .iter()
            .find(|f| f.uri == uri)
            .map_or(0, |f| f.retry_count)
    }

    /// Refresh derived counters and the timestamp before a save
    pub fn touch(&mut self) {
        self.failed_count = self.failed_files.len() as u64;
        self.updated_at = Utc::now();
    }

    fn push_mapping(&mut self, mapping: UrlMapping) {
        match self
            .url_mappings
            .iter_mut()
            .find(|m| m.target_case_id == mapping.target_case_id)
        {
            Some(existing) => *existing = mapping,
            None => self.url_mappings.push(mapping),
        }
        self.failed_count = self.failed_files.len() as u64;
    }
}

/// Artifact consumed by the apply-final-locations pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMappingArtifact {
    pub generated_at: DateTime<Utc>,
    pub total_mappings: usize,
    pub mappings: Vec<UrlMapping>,
}

impl UrlMappingArtifact {
    pub fn new(mappings: Vec<UrlMapping>) -> Self {
        Self {
            generated_at: Utc::now(),
            total_mappings: mappings.len(),
            mappings,
        }
    }
}
