//! Entity migration checkpoint
//!
//! Phase progress: accounts → cases → analyses → validate.
//! A phase is complete once listed in `completed_phases`, in progress while it
//! has a last-processed id, and pending otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered migration phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accounts,
    Cases,
    Analyses,
    Validate,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 4] = [Phase::Accounts, Phase::Cases, Phase::Analyses, Phase::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Accounts => "accounts",
            Phase::Cases => "cases",
            Phase::Analyses => "analyses",
            Phase::Validate => "validate",
        }
    }

    /// Phase that must be complete before this one may start
    pub fn prerequisite(&self) -> Option<Phase> {
        match self {
            Phase::Accounts => None,
            Phase::Cases => Some(Phase::Accounts),
            Phase::Analyses => Some(Phase::Cases),
            Phase::Validate => Some(Phase::Analyses),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accounts" => Ok(Phase::Accounts),
            "cases" => Ok(Phase::Cases),
            "analyses" => Ok(Phase::Analyses),
            "validate" => Ok(Phase::Validate),
            other => Err(format!(
                "unknown phase '{other}' (expected accounts, cases, analyses or validate)"
            )),
        }
    }
}

/// Derived state of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    InProgress,
    Complete,
}

/// Running counters for one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCounters {
    /// Records handled (any outcome)
    pub processed: u64,
    /// Rows inserted
    pub created: u64,
    /// Rows already present (idempotent skip)
    pub existing: u64,
    /// Records skipped for data-shape reasons
    pub skipped: u64,
    /// Records that failed after retries or on integrity errors
    pub failed: u64,
}

impl PhaseCounters {
    pub fn add(&mut self, other: &PhaseCounters) {
        self.processed += other.processed;
        self.created += other.created;
        self.existing += other.existing;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Durable migration progress (checkpoint artifact)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    /// Accounts phase position (canonical customer id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_lead_id: Option<String>,
    /// Cases phase position (source id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_conversation_id: Option<String>,
    /// Analyses phase position (source id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_meddic_id: Option<String>,
    #[serde(default)]
    pub completed_phases: Vec<Phase>,
    /// Counters accumulated across resumed runs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stats: BTreeMap<Phase, PhaseCounters>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CheckpointRecord {
    fn default() -> Self {
        Self {
            last_processed_lead_id: None,
            last_processed_conversation_id: None,
            last_processed_meddic_id: None,
            completed_phases: Vec::new(),
            stats: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl CheckpointRecord {
    pub fn is_complete(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn state_of(&self, phase: Phase) -> PhaseState {
        if self.is_complete(phase) {
            PhaseState::Complete
        } else if self.last_processed(phase).is_some() {
            PhaseState::InProgress
        } else {
            PhaseState::Pending
        }
    }

    pub fn last_processed(&self, phase: Phase) -> Option<&str> {
        match phase {
            Phase::Accounts => self.last_processed_lead_id.as_deref(),
            Phase::Cases => self.last_processed_conversation_id.as_deref(),
            Phase::Analyses => self.last_processed_meddic_id.as_deref(),
            Phase::Validate => None,
        }
    }

    /// Record the last id of a finished batch together with its counters
    pub fn record_batch(&mut self, phase: Phase, last_id: &str, batch: &PhaseCounters) {
        let slot = match phase {
            Phase::Accounts => &mut self.last_processed_lead_id,
            Phase::Cases => &mut self.last_processed_conversation_id,
            Phase::Analyses => &mut self.last_processed_meddic_id,
            Phase::Validate => return,
        };
        *slot = Some(last_id.to_string());
        self.stats.entry(phase).or_default().add(batch);
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self, phase: Phase) {
        if !self.is_complete(phase) {
            self.completed_phases.push(phase);
            self.completed_phases.sort();
        }
        self.updated_at = Utc::now();
    }

    /// Forget a phase's position and counters so the next run redoes it
    pub fn reset_phase(&mut self, phase: Phase) {
        match phase {
            Phase::Accounts => self.last_processed_lead_id = None,
            Phase::Cases => self.last_processed_conversation_id = None,
            Phase::Analyses => self.last_processed_meddic_id = None,
            Phase::Validate => {}
        }
        self.completed_phases.retain(|p| *p != phase);
        self.stats.remove(&phase);
        self.updated_at = Utc::now();
    }

    pub fn counters(&self, phase: Phase) -> PhaseCounters {
        self.stats.get(&phase).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_states() {
        let mut checkpoint = CheckpointRecord::default();
        assert_eq!(checkpoint.state_of(Phase::Accounts), PhaseState::Pending);

        checkpoint.record_batch(Phase::Accounts, "202511-122188", &PhaseCounters::default());
        assert_eq!(checkpoint.state_of(Phase::Accounts), PhaseState::InProgress);

        checkpoint.mark_complete(Phase::Accounts);
        assert_eq!(checkpoint.state_of(Phase::Accounts), PhaseState::Complete);
        assert_eq!(checkpoint.state_of(Phase::Cases), PhaseState::Pending);
    }

    #[test]
    fn test_artifact_field_names() {
        let mut checkpoint = CheckpointRecord::default();
        checkpoint.record_batch(Phase::Cases, "M202511-IC004", &PhaseCounters::default());
        checkpoint.mark_complete(Phase::Accounts);

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["lastProcessedConversationId"], "M202511-IC004");
        assert_eq!(json["completedPhases"], serde_json::json!(["accounts"]));
        assert!(json.get("lastProcessedLeadId").is_none());
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn test_minimal_artifact_parses() {
        let checkpoint: CheckpointRecord = serde_json::from_str(
            r#"{"lastProcessedLeadId":"A-1","completedPhases":[],"updatedAt":"2025-11-02T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(checkpoint.last_processed(Phase::Accounts), Some("A-1"));
        assert!(checkpoint.stats.is_empty());
    }

    #[test]
    fn test_mark_complete_is_idempotent_and_ordered() {
        let mut checkpoint = CheckpointRecord::default();
        checkpoint.mark_complete(Phase::Cases);
        checkpoint.mark_complete(Phase::Accounts);
        checkpoint.mark_complete(Phase::Cases);
        assert_eq!(checkpoint.completed_phases, vec![Phase::Accounts, Phase::Cases]);
    }

    #[test]
    fn test_reset_phase_forgets_position() {
        let mut checkpoint = CheckpointRecord::default();
        let batch = PhaseCounters {
            processed: 5,
            failed: 1,
            ..Default::default()
        };
        checkpoint.record_batch(Phase::Cases, "S-5", &batch);
        checkpoint.record_batch(Phase::Accounts, "A-1", &PhaseCounters::default());
        checkpoint.reset_phase(Phase::Cases);
        assert_eq!(checkpoint.state_of(Phase::Cases), PhaseState::Pending);
        assert_eq!(checkpoint.counters(Phase::Cases), PhaseCounters::default());
        assert_eq!(checkpoint.last_processed(Phase::Accounts), Some("A-1"));
    }
}
