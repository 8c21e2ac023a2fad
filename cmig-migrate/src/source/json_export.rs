//! Source export file
//!
//! The document store is exported once to a JSON file. Three layouts are
//! accepted:
//! - an array of documents
//! - `{"documents": [...]}`
//! - an object keyed by document id

use super::{SourceDocument, SourceStore};
use crate::error::{MigrationError, MigrationResult};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct JsonExportSource {
    path: PathBuf,
}

impl JsonExportSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SourceStore for JsonExportSource {
    fn describe(&self) -> String {
        format!("export file {}", self.path.display())
    }

    async fn fetch_documents(&self) -> MigrationResult<Vec<SourceDocument>> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            MigrationError::Source(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let root: Value = serde_json::from_slice(&data).map_err(|e| {
            MigrationError::Source(format!("{} is not valid JSON: {}", self.path.display(), e))
        })?;
        documents_from(root)
    }
}

fn documents_from(root: Value) -> MigrationResult<Vec<SourceDocument>> {
    match root {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(|body| SourceDocument { key: None, body })
            .collect()),
        Value::Object(mut obj) => match obj.remove("documents") {
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .map(|body| SourceDocument { key: None, body })
                .collect()),
            Some(_) => Err(MigrationError::Source(
                "'documents' must be an array".to_string(),
            )),
            None => Ok(obj
                .into_iter()
                .map(|(key, body)| SourceDocument { key: Some(key), body })
                .collect()),
        },
        _ => Err(MigrationError::Source(
            "export must be an array or an object".to_string(),
        )),
    }
}
