//! Object store abstraction

use super::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    /// Object key within the bucket
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Bucket-like object storage
///
/// Keys are `/`-separated relative paths. Implementations must be safe to
/// call concurrently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name for logs and the manifest
    fn bucket(&self) -> &str;

    /// Stable URI identifying `key` in this store
    fn uri_for(&self, key: &str) -> String;

    /// Lists objects whose key starts with `prefix`, in arbitrary order
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// Metadata for `key`, `None` if absent
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Whole object body; `StoreError::NotFound` if absent
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Create or overwrite `key`
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// In-memory store for tests
///
/// Counts transfers and can be told to fail reads of a key a number of times.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    name: String,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    puts: AtomicU64,
    gets: AtomicU64,
    failing_gets: Mutex<HashMap<String, u32>>,
}

impl MemoryObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Seed an object without counting it as a transfer
    pub fn insert(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                key.into(),
                StoredObject {
                    data: data.into(),
                    content_type: content_type.into(),
                    created_at,
                },
            );
        }
    }

    /// Make the next `times` reads of `key` fail with a transport error
    pub fn fail_gets(&self, key: impl Into<String>, times: u32) {
        if let Ok(mut failing) = self.failing_gets.lock() {
            failing.insert(key.into(), times);
        }
    }

    /// Number of successful `put` calls
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful `get` calls
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> StoreError {
        StoreError::Transport("memory store lock poisoned".into())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.name
    }

    fn uri_for(&self, key: &str) -> String {
        format!("mem://{}/{}", self.name, key)
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectMeta {
                key: key.clone(),
                size: o.data.len() as u64,
                content_type: Some(o.content_type.clone()),
                created_at: Some(o.created_at),
            })
            .collect())
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.data.len() as u64,
            content_type: Some(o.content_type.clone()),
            created_at: Some(o.created_at),
        }))
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        {
            let mut failing = self.failing_gets.lock().map_err(|_| Self::poisoned())?;
            if let Some(remaining) = failing.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Transport(format!("injected failure reading {key}")));
                }
            }
        }

        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        let data = objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                created_at: Utc::now(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
