//! Post-migration validator
//!
//! Compares the target store against what the source says should be there.
//!
//! Checks (hard unless noted):
//! - account, case and analysis sets match their source-derived expectations
//! - no migrated case without its account, no analysis without its case
//! - required columns of migrated rows are non-blank
//! - a random sample of records maps to exactly what was stored
//! - service-account ownership stays under [`SERVICE_ACCOUNT_WARN_RATIO`] (soft)

use crate::db::{accounts, analyses, cases};
use crate::error::MigrationResult;
use crate::identity::{canonical_id_of, SERVICE_ACCOUNT};
use crate::mappers::{map_analysis, map_case, MapContext};
use crate::models::ids::case_number_for;
use crate::models::{
    CheckResult, CheckSeverity, SourceCaseRecord, TargetAnalysis, TargetCase, ValidationReport,
    ORIGIN_MIGRATION,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Fallback ownership share above which the soft check warns
pub const SERVICE_ACCOUNT_WARN_RATIO: f64 = 0.10;

/// Mismatching ids listed per check
const DETAIL_LIMIT: usize = 10;

pub struct Validator {
    /// Records compared field by field
    sample_size: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self { sample_size: 20 }
    }
}

impl Validator {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// Run every check against `pool` for the given source records
    pub async fn validate(&self, pool: &SqlitePool, records: &[SourceCaseRecord]) -> MigrationResult<ValidationReport> {
        let expected = Expected::from_records(records);
        let mut checks = Vec::new();

        let all_accounts = accounts::load_customer_numbers(pool).await?;
        let migrated_accounts = accounts::load_migrated_customer_numbers(pool).await?;
        checks.push(set_check("account_count", &expected.accounts, &all_accounts, &migrated_accounts));

        let migrated_cases = cases::load_migrated_case_numbers(pool).await?;
        checks.push(set_check("case_count", &expected.cases, &migrated_cases, &migrated_cases));

        let migrated_analyses = analyses::load_migrated_analysis_sources(pool).await?;
        checks.push(set_check(
            "analysis_count",
            &expected.analyses,
            &migrated_analyses,
            &migrated_analyses,
        ));

        checks.push(zero_check("orphan_cases", cases::count_orphan_cases(pool).await?));
        checks.push(zero_check("orphan_analyses", analyses::count_orphan_analyses(pool).await?));

        let missing_required = [
            ("accounts", accounts::count_accounts_missing_required(pool).await?),
            ("cases", cases::count_cases_missing_required(pool).await?),
            ("analyses", analyses::count_analyses_missing_required(pool).await?),
        ];
        let mut required = zero_check("required_fields", missing_required.iter().map(|(_, n)| n).sum());
        required.details = missing_required
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(table, n)| format!("{table}: {n} rows"))
            .collect();
        checks.push(required);

        checks.push(self.sampled_fields(pool, records).await?);
        checks.push(service_account_ratio(pool).await?);

        let report = ValidationReport {
            checked_at: Utc::now(),
            checks,
        };

        for check in report.failures() {
            warn!(check = %check.name, expected = %check.expected, actual = %check.actual, details = ?check.details, "Validation check failed");
        }
        for check in report.warnings() {
            warn!(check = %check.name, expected = %check.expected, actual = %check.actual, "Validation warning");
        }
        info!(
            passed = report.passed(),
            checks = report.checks.len(),
            failures = report.failures().count(),
            warnings = report.warnings().count(),
            "Validation finished"
        );
        Ok(report)
    }

    /// Re-map a random sample and compare against the stored rows
    async fn sampled_fields(&self, pool: &SqlitePool, records: &[SourceCaseRecord]) -> MigrationResult<CheckResult> {
        let candidates: Vec<&SourceCaseRecord> = records.iter().filter(|r| canonical_id_of(r).is_some()).collect();
        let sample: Vec<&SourceCaseRecord> = {
            let mut rng = rand::thread_rng();
            candidates
                .choose_multiple(&mut rng, self.sample_size.min(candidates.len()))
                .copied()
                .collect()
        };

        let mut details = Vec::new();
        let mut matched = 0usize;

        for record in &sample {
            let mismatches = compare_record(pool, record).await?;
            if mismatches.is_empty() {
                matched += 1;
            } else {
                details.push(format!("{}: {}", record.source_id, mismatches.join(", ")));
            }
        }
        details.truncate(DETAIL_LIMIT);

        Ok(CheckResult {
            name: "sampled_fields".to_string(),
            severity: CheckSeverity::Hard,
            expected: sample.len().to_string(),
            actual: matched.to_string(),
            passed: matched == sample.len(),
            details,
        })
    }
}

/// Natural keys the source says the target must hold
struct Expected {
    accounts: BTreeSet<String>,
    cases: BTreeSet<String>,
    /// Source ids of records with a usable analysis
    analyses: BTreeSet<String>,
}

impl Expected {
    fn from_records(records: &[SourceCaseRecord]) -> Self {
        let mut expected = Self {
            accounts: BTreeSet::new(),
            cases: BTreeSet::new(),
            analyses: BTreeSet::new(),
        };
        for record in records {
            let Some(canonical) = canonical_id_of(record) else {
                continue;
            };
            expected.accounts.insert(canonical.into_inner());
            expected.cases.insert(case_number_for(&record.source_id));
            if record.has_usable_analysis() {
                expected.analyses.insert(record.source_id.clone());
            }
        }
        expected
    }
}

/// Expected keys must all be present; migrated keys must all be expected
fn set_check(
    name: &str,
    expected: &BTreeSet<String>,
    present: &BTreeSet<String>,
    migrated: &BTreeSet<String>,
) -> CheckResult {
    let missing: Vec<&String> = expected.difference(present).collect();
    let unexpected: Vec<&String> = migrated.difference(expected).collect();
    let actual = expected.len() - missing.len() + unexpected.len();

    let details = missing
        .iter()
        .take(DETAIL_LIMIT)
        .map(|key| format!("missing: {key}"))
        .chain(unexpected.iter().take(DETAIL_LIMIT).map(|key| format!("unexpected: {key}")))
        .collect();

    CheckResult {
        name: name.to_string(),
        severity: CheckSeverity::Hard,
        expected: expected.len().to_string(),
        actual: actual.to_string(),
        passed: missing.is_empty() && unexpected.is_empty(),
        details,
    }
}

fn zero_check(name: &str, count: i64) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        severity: CheckSeverity::Hard,
        expected: "0".to_string(),
        actual: count.to_string(),
        passed: count == 0,
        details: Vec::new(),
    }
}

async fn service_account_ratio(pool: &SqlitePool) -> MigrationResult<CheckResult> {
    let owned = accounts::count_migrated_accounts_owned_by(pool, SERVICE_ACCOUNT).await?
        + cases::count_migrated_cases_owned_by(pool, SERVICE_ACCOUNT).await?;
    let total = accounts::count_accounts(pool, Some(ORIGIN_MIGRATION)).await?
        + cases::count_cases(pool, Some(ORIGIN_MIGRATION)).await?;

    let ratio = if total > 0 { owned as f64 / total as f64 } else { 0.0 };

    Ok(CheckResult {
        name: "service_account_ratio".to_string(),
        severity: CheckSeverity::Soft,
        expected: format!("<= {:.1}%", SERVICE_ACCOUNT_WARN_RATIO * 100.0),
        actual: format!("{:.1}%", ratio * 100.0),
        passed: ratio <= SERVICE_ACCOUNT_WARN_RATIO,
        details: vec![format!("{owned} of {total} migrated rows")],
    })
}

/// Names of fields where the stored rows differ from a fresh mapping
async fn compare_record(pool: &SqlitePool, record: &SourceCaseRecord) -> MigrationResult<Vec<&'static str>> {
    let case_number = case_number_for(&record.source_id);
    let Some(stored) = cases::fetch_case(pool, &case_number).await? else {
        return Ok(vec!["case"]);
    };

    let mut mismatches = Vec::new();

    let expected_account = match canonical_id_of(record) {
        Some(canonical) => accounts::find_account_id(pool, canonical.as_str()).await?,
        None => None,
    };
    if expected_account != Some(stored.account_id) {
        mismatches.push("account_id");
    }

    // Owner and audio location are resolved or rewritten after mapping
    let ctx = MapContext::new(stored.owner_id.clone(), stored.created_at);
    if let Some(expected) = map_case(record, stored.account_id, &ctx) {
        mismatches.extend(case_mismatches(&expected, &stored, record.created_at.is_some()));
    }

    if let Some(expected) = map_analysis(record, stored.id, stored.account_id, &ctx) {
        match analyses::fetch_analysis(pool, stored.id).await? {
            Some(stored_analysis) => mismatches.extend(analysis_mismatches(&expected, &stored_analysis)),
            None => mismatches.push("analysis"),
        }
    }

    Ok(mismatches)
}

fn case_mismatches(expected: &TargetCase, stored: &TargetCase, compare_created: bool) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if expected.id != stored.id {
        fields.push("id");
    }
    if expected.status != stored.status {
        fields.push("status");
    }
    if expected.record_type != stored.record_type {
        fields.push("record_type");
    }
    if expected.unit != stored.unit {
        fields.push("unit");
    }
    if expected.transcript != stored.transcript {
        fields.push("transcript");
    }
    if expected.summary != stored.summary {
        fields.push("summary");
    }
    if expected.duration_seconds != stored.duration_seconds {
        fields.push("duration_seconds");
    }
    if expected.source_id != stored.source_id {
        fields.push("source_id");
    }
    if compare_created && expected.created_at != stored.created_at {
        fields.push("created_at");
    }
    fields
}

fn analysis_mismatches(expected: &TargetAnalysis, stored: &TargetAnalysis) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if expected.decision_maker != stored.decision_maker {
        fields.push("decision_maker");
    }
    if expected.overall_score != stored.overall_score {
        fields.push("overall_score");
    }
    if expected.summary != stored.summary {
        fields.push("analysis_summary");
    }
    if expected.payload != stored.payload {
        fields.push("payload");
    }
    fields
}
