//! Enumeration translation tables
//!
//! Each table is a closed match with an explicit default arm. Keys are
//! compared after trimming, lower-casing and folding `-`/space to `_`.

use crate::models::{CaseStatus, DecisionMaker, RecordType};

/// Unit assigned when the source has none
pub const DEFAULT_UNIT: &str = "general";

fn key(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

/// Source status → target case status (default: open)
pub fn translate_status(raw: Option<&str>) -> CaseStatus {
    match raw.map(key).as_deref() {
        Some("new" | "pending" | "open" | "created") => CaseStatus::Open,
        Some("in_progress" | "inprogress" | "contacted" | "follow_up" | "followup") => {
            CaseStatus::InProgress
        }
        Some("analyzed" | "analysed" | "completed" | "complete" | "done") => CaseStatus::Analyzed,
        Some("won" | "closed_won" | "deal") => CaseStatus::Won,
        Some("lost" | "closed_lost" | "rejected") => CaseStatus::Lost,
        Some("archived" | "deleted" | "inactive") => CaseStatus::Archived,
        _ => CaseStatus::Open,
    }
}

/// Source record type → target record type (default: other)
pub fn translate_record_type(raw: Option<&str>) -> RecordType {
    match raw.map(key).as_deref() {
        Some("call" | "phone" | "phone_call" | "voice") => RecordType::Call,
        Some("meeting" | "visit" | "onsite" | "on_site") => RecordType::Meeting,
        Some("chat" | "message" | "line" | "text") => RecordType::Chat,
        _ => RecordType::Other,
    }
}

/// Decision-maker flag → tri-state (default: unknown)
pub fn translate_decision_maker(raw: Option<&str>) -> DecisionMaker {
    match raw.map(key).as_deref() {
        Some("true" | "yes" | "y" | "1") => DecisionMaker::Yes,
        Some("false" | "no" | "n" | "0") => DecisionMaker::No,
        _ => DecisionMaker::Unknown,
    }
}

/// Unit tag: trimmed, lower-cased, `general` when blank
pub fn normalize_unit(raw: Option<&str>) -> String {
    raw.map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_UNIT.to_string())
}

/// Round to the nearest integer (halves away from zero) for integral columns
///
/// Non-finite input has no integral value.
pub fn round_to_i64(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}
