//! Directory-backed object store
//!
//! Keys map to relative file paths under a root directory. Used for buckets
//! that were exported to disk and for staging targets.

use super::store::{ObjectMeta, ObjectStore};
use super::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket: String,
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(bucket: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    fn meta_for(key: String, metadata: &std::fs::Metadata) -> ObjectMeta {
        let created_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        ObjectMeta {
            key,
            size: metadata.len(),
            content_type: None,
            created_at,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn uri_for(&self, key: &str) -> String {
        format!("file://{}/{}", self.root.display(), key)
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            let mut objects = Vec::new();
            if !root.is_dir() {
                return objects;
            }

            for entry in WalkDir::new(&root).follow_links(false) {
                match entry {
                    Ok(entry) => {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let Some(key) = Self::key_for(&root, entry.path()) else {
                            tracing::warn!(path = %entry.path().display(), "Skipping non-UTF-8 path");
                            continue;
                        };
                        if !key.starts_with(&prefix) || key.ends_with(".tmp") {
                            continue;
                        }
                        match entry.metadata() {
                            Ok(metadata) => objects.push(Self::meta_for(key, &metadata)),
                            Err(e) => tracing::warn!("Error reading metadata for {}: {}", key, e),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Error accessing entry: {}", e);
                    }
                }
            }
            objects
        })
        .await
        .map_err(|e| StoreError::Transport(format!("listing task failed: {e}")))
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(Self::meta_for(key.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}
