//! Run reports
//!
//! Per-record problems are accumulated here instead of being raised, so one
//! bad record never halts a healthy batch.

use crate::models::{Phase, PhaseCounters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-record error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    /// Network/lock/throttling failure that outlived its retries
    Transient,
    /// Source record missing required data; skipped and counted
    DataShape,
    /// Referential problem, e.g. a case whose account does not exist
    Integrity,
}

/// One per-record problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub phase: Phase,
    pub source_id: String,
    pub kind: RecordErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(phase: Phase, source_id: impl Into<String>, kind: RecordErrorKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            source_id: source_id.into(),
            kind,
            message: message.into(),
        }
    }

    /// Data-shape skips are expected outcomes; the rest fail the run
    pub fn is_failure(&self) -> bool {
        self.kind != RecordErrorKind::DataShape
    }
}

/// Outcome of one phase in this invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: Phase,
    /// Work items in the phase (all batches, including ones done before a resume)
    pub total: usize,
    /// Items this invocation started from (0 on a fresh run)
    pub resumed_at: usize,
    /// Counters for this invocation only
    pub counters: PhaseCounters,
    pub elapsed_ms: u64,
    /// True when the checkpoint already marked the phase complete
    pub already_complete: bool,
}

/// Severity of a validation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    /// Failing it fails the run
    Hard,
    /// Informational; failing it only warns
    Soft,
}

/// One validation check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: CheckSeverity,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    /// Extra detail (first mismatching ids, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Post-migration validation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// Pass only if every hard check passed
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.severity == CheckSeverity::Hard)
            .all(|c| c.passed)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.severity == CheckSeverity::Soft && !c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.severity == CheckSeverity::Hard && !c.passed)
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Final report of a migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub operator: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Source documents rejected at the parsing boundary
    pub unparsable_records: usize,
    pub phases: Vec<PhaseReport>,
    pub errors: Vec<RecordError>,
    pub validation: Option<ValidationReport>,
}

impl MigrationReport {
    pub fn new(operator: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            operator: operator.into(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            unparsable_records: 0,
            phases: Vec::new(),
            errors: Vec::new(),
            validation: None,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn failure_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_failure()).count()
    }

    /// True when no record failed and validation (if it ran) passed
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0 && self.validation.as_ref().map_or(true, ValidationReport::passed)
    }
}
