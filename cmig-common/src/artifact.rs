//! Crash-safe JSON artifacts
//!
//! Checkpoints, manifests, blob progress and url-mapping files are all JSON
//! documents on local disk. Writes go to a sibling temp file which is flushed,
//! synced and then renamed over the destination, so an interrupted write
//! leaves the previous valid document in place.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Temp file used while replacing `path`
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let serialized = serde_json::to_vec_pretty(value)?;
    let tmp_path = tmp_path_for(path);

    let mut tmp = fs::File::create(&tmp_path).await?;
    tmp.write_all(&serialized).await?;
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);

    fs::rename(&tmp_path, path).await.map_err(|e| {
        Error::Internal(format!(
            "Failed to replace {} with {}: {}",
            path.display(),
            tmp_path.display(),
            e
        ))
    })?;

    tracing::trace!(path = %path.display(), bytes = serialized.len(), "Artifact written");
    Ok(())
}

/// Read a JSON artifact
///
/// Returns `Ok(None)` when the file does not exist. A file that exists but
/// does not parse is an error: callers must not mistake a damaged artifact for
/// a fresh start.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    serde_json::from_slice(&data).map(Some).map_err(|e| {
        Error::InvalidInput(format!("Artifact {} is not valid: {}", path.display(), e))
    })
}

/// Remove an artifact (and any leftover temp file). Returns true if the
/// artifact existed.
pub async fn remove_artifact(path: &Path) -> Result<bool> {
    let _ = fs::remove_file(tmp_path_for(path)).await;
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("doc.json");

        let doc = Doc { name: "cases".into(), count: 3 };
        write_json_atomic(&path, &doc).await.unwrap();

        let loaded: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(doc));
        assert!(!tmp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Doc> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{\"name\": \"cas").unwrap();

        let result: Result<Option<Doc>> = read_json(&path).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_stale_temp_file_does_not_affect_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { name: "a".into(), count: 1 }).await.unwrap();

        // Simulate a crash halfway through the next write
        std::fs::write(tmp_path_for(&path), b"{\"na").unwrap();

        let loaded: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(Doc { name: "a".into(), count: 1 }));

        write_json_atomic(&path, &Doc { name: "b".into(), count: 2 }).await.unwrap();
        let loaded: Option<Doc> = read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(Doc { name: "b".into(), count: 2 }));
    }

    #[tokio::test]
    async fn test_remove_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { name: "a".into(), count: 1 }).await.unwrap();

        assert!(remove_artifact(&path).await.unwrap());
        assert!(!remove_artifact(&path).await.unwrap());
    }
}
