//! Source asset manifest
//!
//! The manifest is a durable snapshot of the legacy bucket. Transfers index
//! into it, so it is written once before any copy starts and resume never
//! depends on a live listing.

use super::store::ObjectStore;
use super::StoreResult;
use crate::db::cases::CaseTarget;
use crate::models::{BlobManifest, BlobManifestEntry};
use chrono::Utc;
use cmig_common::artifact::{read_json, write_json_atomic};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content type used when neither the store nor the extension says otherwise
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type from a file extension
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "webm" => "audio/webm",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "amr" => "audio/amr",
        "3gp" => "audio/3gpp",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Extension of the last path segment, if any
pub fn extension_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

/// Source case id encoded in an object key
///
/// The id is the first path segment after `prefix`, without its extension:
/// `recordings/M202511-IC004.webm` and `recordings/M202511-IC004/take2.webm`
/// both give `M202511-IC004`.
pub fn derive_source_case_id(key: &str, prefix: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?.trim_start_matches('/');
    let segment = rest.split('/').next()?;
    let id = match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => segment,
    };
    (!id.is_empty()).then(|| id.to_string())
}

/// Enumerate `prefixes` in `store` and resolve each object to its target case
///
/// `cases` maps source case ids to migrated cases. Objects that resolve to
/// the same case are reduced to the most recently created one. Objects with
/// no matching case stay in the manifest without a target id.
///
/// An object without a creation time takes its case's `created_at`, so the
/// target key is the same every time the manifest is rebuilt. Only objects
/// with no case fall back to the listing time.
pub async fn build_manifest(
    store: &dyn ObjectStore,
    prefixes: &[String],
    cases: &HashMap<String, CaseTarget>,
) -> StoreResult<BlobManifest> {
    let listed_at = Utc::now();
    let mut by_case: HashMap<Uuid, BlobManifestEntry> = HashMap::new();
    let mut unresolved: BTreeMap<String, BlobManifestEntry> = BTreeMap::new();

    for prefix in prefixes {
        let objects = store.list(prefix).await?;
        debug!(prefix = %prefix, count = objects.len(), "Listed source prefix");

        for object in objects {
            let source_case = derive_source_case_id(&object.key, prefix);
            let case = source_case.as_deref().and_then(|id| cases.get(id).copied());
            let target_case_id = case.map(|c| c.id);

            let content_type = object
                .content_type
                .filter(|ct| !ct.is_empty() && ct != FALLBACK_CONTENT_TYPE)
                .unwrap_or_else(|| {
                    content_type_for_extension(extension_of(&object.key).unwrap_or_default())
                        .to_string()
                });

            let entry = BlobManifestEntry {
                uri: store.uri_for(&object.key),
                path: object.key.clone(),
                size_bytes: object.size,
                content_type,
                created_at: object
                    .created_at
                    .or(case.map(|c| c.created_at))
                    .unwrap_or(listed_at),
                target_case_id,
            };

            match target_case_id {
                Some(case_id) => match by_case.get(&case_id) {
                    Some(current) if current.created_at >= entry.created_at => {
                        debug!(kept = %current.path, dropped = %entry.path, "Duplicate asset for case");
                    }
                    _ => {
                        by_case.insert(case_id, entry);
                    }
                },
                None => {
                    warn!(key = %object.key, source_case = ?source_case, "No migrated case for asset");
                    unresolved.insert(entry.path.clone(), entry);
                }
            }
        }
    }

    let mut files: Vec<BlobManifestEntry> = by_case.into_values().chain(unresolved.into_values()).collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let manifest = BlobManifest::new(store.bucket(), files);
    info!(
        bucket = %manifest.bucket,
        files = manifest.total_files,
        bytes = manifest.total_size_bytes,
        "Manifest built"
    );
    Ok(manifest)
}

pub async fn save_manifest(path: &Path, manifest: &BlobManifest) -> cmig_common::Result<()> {
    write_json_atomic(path, manifest).await
}

pub async fn load_manifest(path: &Path) -> cmig_common::Result<Option<BlobManifest>> {
    read_json(path).await
}
