//! Typed source records
//!
//! Produced only by [`crate::source::parse_source_record`]. Everything
//! downstream works on these types and never touches raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historical case document from the source store
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCaseRecord {
    /// Opaque source document id
    pub source_id: String,
    /// Customer identifier as typed by users (may contain Unicode dashes)
    pub raw_customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    /// Who handled the case
    pub actor: ActorRef,
    /// Unit / product-line tag
    pub unit: Option<String>,
    /// Raw status value, translated by the case mapper
    pub status: Option<String>,
    /// Raw record type value, translated by the case mapper
    pub record_type: Option<String>,
    /// Ordered transcript; empty when the source had none
    pub transcript: Vec<TranscriptSegment>,
    pub summary: Option<String>,
    pub analysis: Option<AnalysisPayload>,
    pub audio: Option<AudioAsset>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SourceCaseRecord {
    /// Minimal record with only an id, used as a builder base in tests and
    /// by the parser before optional fields are filled in
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            raw_customer_id: None,
            customer_name: None,
            phone: None,
            actor: ActorRef::default(),
            unit: None,
            status: None,
            record_type: None,
            transcript: Vec::new(),
            summary: None,
            analysis: None,
            audio: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sort key giving the stable source ordering resume depends on
    ///
    /// Records without a creation time sort first, ties break on source id.
    pub fn order_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.created_at, self.source_id.as_str())
    }

    /// True when the record carries an analysis payload worth migrating
    pub fn has_usable_analysis(&self) -> bool {
        self.analysis.as_ref().is_some_and(AnalysisPayload::is_usable)
    }
}

/// Reference to the person who handled a case in the source system
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorRef {
    /// Messaging-platform user id (or similar external id)
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ActorRef {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none() && self.email.is_none()
    }
}

/// One utterance in a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: String,
    pub text: String,
    /// Offset from the start of the recording, seconds
    pub start: f64,
    pub end: f64,
}

/// Multi-stage analysis attached to a case
///
/// Stage contents are carried verbatim; only the fields the target schema
/// indexes are lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPayload {
    /// Stage name → stage document, as found in the source
    pub stages: serde_json::Map<String, serde_json::Value>,
    /// Raw decision-maker flag (bool, "yes"/"no", ...), stringified
    pub decision_maker: Option<String>,
    pub overall_score: Option<f64>,
    pub summary: Option<String>,
}

impl AnalysisPayload {
    pub fn is_usable(&self) -> bool {
        !self.stages.is_empty() || self.overall_score.is_some() || self.summary.is_some()
    }
}

/// Audio recording attached to a case
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    /// Location in the source object store
    pub uri: String,
    pub duration_seconds: Option<f64>,
    pub size_bytes: Option<u64>,
}
