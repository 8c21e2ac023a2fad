//! Target relational entities
//!
//! Accounts own cases; a case owns at most one analysis. Every row written by
//! the migration carries `origin = 'migration'`, which is what rollback keys on.

use crate::models::TranscriptSegment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Provenance marker for rows created by this tool
pub const ORIGIN_MIGRATION: &str = "migration";
/// Provenance marker for rows created by the day-to-day application
pub const ORIGIN_APP: &str = "app";

/// Case lifecycle status in the target schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    InProgress,
    Analyzed,
    Won,
    Lost,
    Archived,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Analyzed => "analyzed",
            CaseStatus::Won => "won",
            CaseStatus::Lost => "lost",
            CaseStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(CaseStatus::Open),
            "in_progress" => Ok(CaseStatus::InProgress),
            "analyzed" => Ok(CaseStatus::Analyzed),
            "won" => Ok(CaseStatus::Won),
            "lost" => Ok(CaseStatus::Lost),
            "archived" => Ok(CaseStatus::Archived),
            other => Err(format!("unknown case status '{other}'")),
        }
    }
}

/// Kind of customer touchpoint a case records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Call,
    Meeting,
    Chat,
    Other,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Call => "call",
            RecordType::Meeting => "meeting",
            RecordType::Chat => "chat",
            RecordType::Other => "other",
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(RecordType::Call),
            "meeting" => Ok(RecordType::Meeting),
            "chat" => Ok(RecordType::Chat),
            "other" => Ok(RecordType::Other),
            other => Err(format!("unknown record type '{other}'")),
        }
    }
}

/// Whether the contact on a case is the decision maker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMaker {
    Yes,
    No,
    Unknown,
}

impl DecisionMaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMaker::Yes => "yes",
            DecisionMaker::No => "no",
            DecisionMaker::Unknown => "unknown",
        }
    }
}

/// One customer (one row per canonical customer id)
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAccount {
    pub id: Uuid,
    /// Canonical customer id, unique
    pub customer_number: String,
    pub name: String,
    pub phone: Option<String>,
    pub unit: String,
    pub owner_id: String,
    /// Raw id of the representative source record, for traceability
    pub source_customer_id: String,
    pub created_at: DateTime<Utc>,
}

/// One case (one row per source record)
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCase {
    pub id: Uuid,
    /// `MIG-<source id>`, unique
    pub case_number: String,
    pub account_id: Uuid,
    pub status: CaseStatus,
    pub record_type: RecordType,
    pub unit: String,
    pub transcript: Vec<TranscriptSegment>,
    pub summary: Option<String>,
    /// Source-store location until the blob pass rewrites it
    pub audio_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub owner_id: String,
    /// Original source document id
    pub source_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Analysis attached to a case
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAnalysis {
    pub id: Uuid,
    pub case_id: Uuid,
    pub account_id: Uuid,
    pub decision_maker: DecisionMaker,
    pub overall_score: Option<i64>,
    pub summary: Option<String>,
    /// Stage documents, verbatim
    pub payload: serde_json::Value,
    pub source_id: String,
    pub created_at: DateTime<Utc>,
}
