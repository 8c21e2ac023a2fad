//! Batch Orchestrator
//!
//! Drives the entity migration through its phases:
//! 1. Accounts: one per canonical customer id
//! 2. Cases: one per source record, under its account
//! 3. Analyses: one per source record with a usable analysis, under its case
//! 4. Validate: post-migration checks
//!
//! Each phase walks the ordered source list in batches. After every batch the
//! checkpoint is saved, so a killed run resumes at the next unfinished batch.
//! Per-record problems are collected in the [`MigrationReport`]; only
//! run-level failures (checkpoint damage, phase ordering, database loss)
//! abort the run.

mod phase_accounts;
mod phase_analyses;
mod phase_cases;
mod phase_validate;
mod statistics;
mod work;

pub use statistics::PhaseProgress;
pub use work::{remaining_work, RemainingWork};

use crate::checkpoint::CheckpointStore;
use crate::db::cases::CaseLink;
use crate::error::{MigrationError, MigrationResult};
use crate::identity::{dedupe_to_accounts, ActorResolver, CanonicalCustomerId};
use crate::models::{
    CheckpointRecord, MigrationReport, Phase, PhaseCounters, PhaseReport, RecordError,
    RecordErrorKind, SourceCaseRecord,
};
use crate::source::{RejectedDocument, SourceLoad};
use crate::utils::RetryPolicy;
use chrono::{DateTime, Utc};
use cmig_common::artifact::write_json_atomic;
use cmig_common::config::Settings;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Run parameters
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub dry_run: bool,
    /// Records compared field by field during validation
    pub sample_size: usize,
    pub retry: RetryPolicy,
    /// Where the final report is written; `None` keeps it in memory
    pub report_path: Option<PathBuf>,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            batch_delay: Duration::from_millis(settings.batch_delay_ms),
            dry_run: settings.dry_run,
            sample_size: settings.sample_size,
            retry: RetryPolicy::from_settings(settings),
            report_path: Some(settings.report_path()),
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::ZERO,
            dry_run: false,
            sample_size: 20,
            retry: RetryPolicy::default(),
            report_path: None,
        }
    }
}

/// Rows a dry run would have written
///
/// Later phases consult this before the store, so a dry run sees its own
/// planned parents exactly as a real run sees inserted ones.
#[derive(Debug, Default)]
struct DryRunPlan {
    /// customer_number → account id
    accounts: HashMap<String, Uuid>,
    /// case_number → links
    cases: HashMap<String, CaseLink>,
    /// case ids with an analysis
    analyses: HashSet<Uuid>,
}

pub struct MigrationOrchestrator {
    pool: SqlitePool,
    options: OrchestratorOptions,
    /// Source records in `(created_at, source_id)` order
    records: Arc<Vec<SourceCaseRecord>>,
    /// One representative record per canonical customer id, in id order
    accounts: Arc<Vec<(CanonicalCustomerId, SourceCaseRecord)>>,
    rejected: Vec<RejectedDocument>,
    resolver: ActorResolver,
    checkpoint_store: CheckpointStore,
    checkpoint: CheckpointRecord,
    plan: DryRunPlan,
    report: MigrationReport,
    migrated_at: DateTime<Utc>,
}

impl MigrationOrchestrator {
    pub fn new(
        pool: SqlitePool,
        options: OrchestratorOptions,
        source: SourceLoad,
        resolver: ActorResolver,
        checkpoint_store: CheckpointStore,
        operator: impl Into<String>,
    ) -> Self {
        let SourceLoad { mut records, rejected } = source;
        records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let dedup = dedupe_to_accounts(&records);
        debug!(
            accounts = dedup.accounts.len(),
            without_customer_id = dedup.skipped.len(),
            "Source records grouped by customer"
        );

        let checkpoint_store = if options.dry_run && checkpoint_store.is_persistent() {
            debug!(path = %checkpoint_store.path().display(), "Dry run keeps checkpoint in memory");
            checkpoint_store.into_memory_only()
        } else {
            checkpoint_store
        };

        let report = MigrationReport::new(operator, options.dry_run);
        Self {
            pool,
            records: Arc::new(records),
            accounts: Arc::new(dedup.accounts.into_iter().collect()),
            rejected,
            resolver,
            checkpoint_store,
            checkpoint: CheckpointRecord::default(),
            plan: DryRunPlan::default(),
            report,
            migrated_at: Utc::now(),
            options,
        }
    }

    pub fn report(&self) -> &MigrationReport {
        &self.report
    }

    pub fn checkpoint(&self) -> &CheckpointRecord {
        &self.checkpoint
    }

    /// Run every phase, or only `only`
    ///
    /// A full run stops after a phase that finished with failures; the next
    /// run redoes that phase. Running a single phase whose prerequisite is
    /// not complete is a fatal error.
    pub async fn run(&mut self, only: Option<Phase>) -> MigrationResult<MigrationReport> {
        self.checkpoint = self.checkpoint_store.load().await?.unwrap_or_default();

        info!(
            run_id = %self.report.run_id,
            operator = %self.report.operator,
            dry_run = self.options.dry_run,
            records = self.records.len(),
            accounts = self.accounts.len(),
            only = ?only,
            "Starting migration"
        );

        match self.resolver.preload().await {
            Ok(count) => debug!(profiles = count, "Actor cache preloaded"),
            Err(e) => warn!(error = %e, "Actor cache preload failed, resolving on demand"),
        }

        self.record_rejections();

        let phases = match only {
            Some(phase) => vec![phase],
            None => Phase::ALL.to_vec(),
        };

        for phase in phases {
            if let Some(requires) = phase.prerequisite() {
                if !self.checkpoint.is_complete(requires) {
                    if only.is_some() {
                        return Err(MigrationError::PhaseOrder { phase, requires });
                    }
                    warn!(phase = %phase, requires = %requires, "Prerequisite incomplete, stopping run");
                    break;
                }
            }
            self.run_phase(phase).await?;
        }

        self.finish().await
    }

    /// Run one phase from its checkpoint position to the end
    pub async fn run_phase(&mut self, phase: Phase) -> MigrationResult<()> {
        if self.checkpoint.is_complete(phase) {
            info!(phase = %phase, "Phase already complete");
            self.report.phases.push(PhaseReport {
                phase,
                total: 0,
                resumed_at: 0,
                counters: self.checkpoint.counters(phase),
                elapsed_ms: 0,
                already_complete: true,
            });
            return Ok(());
        }

        let (progress, complete) = match phase {
            Phase::Accounts => self.phase_accounts().await?,
            Phase::Cases => self.phase_cases().await?,
            Phase::Analyses => self.phase_analyses().await?,
            Phase::Validate => self.phase_validate().await?,
        };

        self.finish_phase(phase, progress, complete).await
    }

    fn record_rejections(&mut self) {
        self.report.unparsable_records = self.rejected.len();
        for rejected in &self.rejected {
            warn!(reference = %rejected.reference, error = %rejected.error, "Unparsable source document");
            self.report.errors.push(RecordError::new(
                Phase::Cases,
                rejected.reference.clone(),
                RecordErrorKind::DataShape,
                rejected.error.to_string(),
            ));
        }
    }

    /// Persist a finished batch and pace the next one
    async fn finish_batch(
        &mut self,
        phase: Phase,
        last_id: &str,
        batch: &PhaseCounters,
        progress: &mut PhaseProgress,
        more_batches: bool,
    ) -> MigrationResult<()> {
        self.checkpoint.record_batch(phase, last_id, batch);
        self.checkpoint_store.save(&self.checkpoint).await?;

        progress.record_batch(batch);
        progress.log_batch();

        if more_batches && !self.options.batch_delay.is_zero() {
            tokio::time::sleep(self.options.batch_delay).await;
        }
        Ok(())
    }

    async fn finish_phase(&mut self, phase: Phase, progress: PhaseProgress, complete: bool) -> MigrationResult<()> {
        if complete {
            self.checkpoint.mark_complete(phase);
        } else if phase != Phase::Validate {
            // Failed records sit before the saved position; start over next time
            self.checkpoint.reset_phase(phase);
        }
        self.checkpoint_store.save(&self.checkpoint).await?;

        let counters = progress.counters();
        let elapsed_ms = progress.elapsed().as_millis() as u64;
        if complete {
            info!(
                phase = %phase,
                processed = counters.processed,
                created = counters.created,
                existing = counters.existing,
                skipped = counters.skipped,
                elapsed_ms,
                "Phase complete"
            );
        } else {
            error!(phase = %phase, failed = counters.failed, elapsed_ms, "Phase finished with failures");
        }

        self.report.phases.push(PhaseReport {
            phase,
            total: progress.total(),
            resumed_at: progress.resumed_at(),
            counters,
            elapsed_ms,
            already_complete: false,
        });
        Ok(())
    }

    async fn finish(&mut self) -> MigrationResult<MigrationReport> {
        self.report.finished_at = Some(Utc::now());

        let stats = self.resolver.stats();
        info!(
            cache_hits = stats.cache_hits,
            lookups = stats.lookups,
            fallbacks = stats.fallbacks,
            "Actor resolution"
        );

        let all_complete = Phase::ALL.iter().all(|p| self.checkpoint.is_complete(*p));
        if !self.options.dry_run && all_complete && self.report.is_success() {
            self.checkpoint_store.clear().await?;
        }

        if let Some(path) = &self.options.report_path {
            write_json_atomic(path, &self.report).await?;
            debug!(path = %path.display(), "Report written");
        }

        let failures = self.report.failure_count();
        if self.report.is_success() {
            info!(
                run_id = %self.report.run_id,
                dry_run = self.options.dry_run,
                skipped = self.report.errors.len() - failures,
                "Migration finished"
            );
        } else {
            error!(
                run_id = %self.report.run_id,
                failures,
                validation_passed = self.report.validation.as_ref().map(|v| v.passed()),
                "Migration finished with failures"
            );
        }

        Ok(self.report.clone())
    }

    fn record_skip(&mut self, phase: Phase, source_id: &str, reason: &str, counters: &mut PhaseCounters) {
        debug!(phase = %phase, source_id, reason, "Record skipped");
        counters.skipped += 1;
        self.report
            .errors
            .push(RecordError::new(phase, source_id, RecordErrorKind::DataShape, reason));
    }

    fn record_failure(
        &mut self,
        phase: Phase,
        source_id: &str,
        kind: RecordErrorKind,
        message: String,
        counters: &mut PhaseCounters,
    ) {
        warn!(phase = %phase, source_id, kind = ?kind, error = %message, "Record failed");
        counters.failed += 1;
        self.report.errors.push(RecordError::new(phase, source_id, kind, message));
    }

    /// Count a write outcome: `Ok(true)` created, `Ok(false)` already present
    fn tally(
        &mut self,
        phase: Phase,
        source_id: &str,
        outcome: cmig_common::Result<bool>,
        counters: &mut PhaseCounters,
    ) {
        match outcome {
            Ok(true) => counters.created += 1,
            Ok(false) => counters.existing += 1,
            Err(e) => {
                let kind = if e.is_transient() {
                    RecordErrorKind::Transient
                } else {
                    RecordErrorKind::Integrity
                };
                self.record_failure(phase, source_id, kind, e.to_string(), counters);
            }
        }
    }
}
