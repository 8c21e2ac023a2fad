//! Source store access
//!
//! A [`SourceStore`] yields raw documents; [`load_source_records`] runs them
//! through the parsing boundary and returns them in the stable order that
//! checkpoint resume relies on (creation time, then source id).

mod json_export;
mod parse;

pub use json_export::JsonExportSource;
pub use parse::{parse_source_record, ParseError};

use crate::error::MigrationResult;
use crate::models::SourceCaseRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// Raw document as stored in the source system
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Document key, when the store keeps it outside the body
    pub key: Option<String>,
    pub body: Value,
}

/// Read access to the document-oriented source store
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Fetch every case document
    async fn fetch_documents(&self) -> MigrationResult<Vec<SourceDocument>>;
}

/// Fixed in-memory document set
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    documents: Vec<SourceDocument>,
}

impl StaticSource {
    pub fn new(bodies: Vec<Value>) -> Self {
        Self {
            documents: bodies
                .into_iter()
                .map(|body| SourceDocument { key: None, body })
                .collect(),
        }
    }
}

#[async_trait]
impl SourceStore for StaticSource {
    fn describe(&self) -> String {
        format!("in-memory source ({} documents)", self.documents.len())
    }

    async fn fetch_documents(&self) -> MigrationResult<Vec<SourceDocument>> {
        Ok(self.documents.clone())
    }
}

/// Document rejected at the parsing boundary
#[derive(Debug, Clone)]
pub struct RejectedDocument {
    /// Best-effort identifier (key, id field, or position)
    pub reference: String,
    pub error: ParseError,
}

/// Parsed, ordered source records
#[derive(Debug, Clone, Default)]
pub struct SourceLoad {
    pub records: Vec<SourceCaseRecord>,
    pub rejected: Vec<RejectedDocument>,
}

/// Fetch, parse and order all source records
///
/// Duplicate source ids keep the first occurrence; later copies are rejected
/// so that case ids stay unique.
pub async fn load_source_records(store: &dyn SourceStore) -> MigrationResult<SourceLoad> {
    let documents = store.fetch_documents().await?;
    info!(source = %store.describe(), documents = documents.len(), "Source documents fetched");

    let mut load = SourceLoad::default();
    let mut seen = HashSet::new();

    for (position, doc) in documents.iter().enumerate() {
        match parse_source_record(doc.key.as_deref(), &doc.body) {
            Ok(record) => {
                if seen.insert(record.source_id.clone()) {
                    load.records.push(record);
                } else {
                    warn!(source_id = %record.source_id, "Duplicate source id, keeping first occurrence");
                    load.rejected.push(RejectedDocument {
                        reference: record.source_id.clone(),
                        error: ParseError::InvalidField {
                            field: "id",
                            reason: "duplicate source id".to_string(),
                        },
                    });
                }
            }
            Err(error) => {
                let reference = doc
                    .key
                    .clone()
                    .or_else(|| doc.body.get("id").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| format!("#{position}"));
                warn!(document = %reference, error = %error, "Source document rejected");
                load.rejected.push(RejectedDocument { reference, error });
            }
        }
    }

    load.records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    info!(
        parsed = load.records.len(),
        rejected = load.rejected.len(),
        "Source records parsed"
    );
    Ok(load)
}
