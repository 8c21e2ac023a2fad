//! Analyses phase: one analysis per case whose source carried one

use super::statistics::PhaseProgress;
use super::work::remaining_work;
use super::MigrationOrchestrator;
use crate::db::analyses::{analysis_exists, insert_analysis_if_absent};
use crate::db::cases::{find_case_link, CaseLink};
use crate::error::MigrationResult;
use crate::identity::canonical_id_of;
use crate::mappers::{map_analysis, MapContext};
use crate::models::ids::case_number_for;
use crate::models::{Phase, PhaseCounters, RecordErrorKind, SourceCaseRecord, TargetAnalysis};
use crate::utils::with_retry;
use tracing::info;

impl MigrationOrchestrator {
    pub(super) async fn phase_analyses(&mut self) -> MigrationResult<(PhaseProgress, bool)> {
        let work: Vec<SourceCaseRecord> = self
            .records
            .iter()
            .filter(|r| r.has_usable_analysis())
            .cloned()
            .collect();
        let remaining = remaining_work(
            work.as_slice(),
            self.checkpoint.last_processed(Phase::Analyses),
            |record| record.source_id.as_str(),
        );
        if remaining.restarted {
            self.checkpoint.reset_phase(Phase::Analyses);
        }

        info!(
            phase = "analyses",
            total = work.len(),
            resume_from = remaining.start_index,
            "Starting phase"
        );

        let mut progress = PhaseProgress::new(Phase::Analyses, work.len(), remaining.start_index);
        let batches: Vec<_> = remaining.items.chunks(self.options.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let mut counters = PhaseCounters::default();
            for record in batch {
                self.migrate_analysis(record, &mut counters).await;
            }
            if let Some(last) = batch.last() {
                self.finish_batch(
                    Phase::Analyses,
                    &last.source_id,
                    &counters,
                    &mut progress,
                    index + 1 < batch_count,
                )
                .await?;
            }
        }

        let complete = self.checkpoint.counters(Phase::Analyses).failed == 0;
        Ok((progress, complete))
    }

    async fn migrate_analysis(&mut self, record: &SourceCaseRecord, counters: &mut PhaseCounters) {
        counters.processed += 1;

        if canonical_id_of(record).is_none() {
            self.record_skip(Phase::Analyses, &record.source_id, "no customer identifier", counters);
            return;
        }

        let link = match self.case_link(&case_number_for(&record.source_id)).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                self.record_failure(
                    Phase::Analyses,
                    &record.source_id,
                    RecordErrorKind::Integrity,
                    "case was not migrated".to_string(),
                    counters,
                );
                return;
            }
            Err(e) => {
                self.tally(Phase::Analyses, &record.source_id, Err(e), counters);
                return;
            }
        };

        let ctx = MapContext::new(String::new(), self.migrated_at);
        let Some(analysis) = map_analysis(record, link.id, link.account_id, &ctx) else {
            self.record_skip(Phase::Analyses, &record.source_id, "analysis is empty", counters);
            return;
        };

        let outcome = if self.options.dry_run {
            self.plan_analysis(&analysis).await
        } else {
            with_retry(
                "insert_analysis",
                &self.options.retry,
                cmig_common::Error::is_transient,
                || insert_analysis_if_absent(&self.pool, &analysis),
            )
            .await
        };

        self.tally(Phase::Analyses, &record.source_id, outcome, counters);
    }

    /// Parent case, including ones only planned by a dry run
    async fn case_link(&self, case_number: &str) -> cmig_common::Result<Option<CaseLink>> {
        if let Some(link) = self.plan.cases.get(case_number) {
            return Ok(Some(*link));
        }
        with_retry(
            "find_case",
            &self.options.retry,
            cmig_common::Error::is_transient,
            || find_case_link(&self.pool, case_number),
        )
        .await
    }

    async fn plan_analysis(&mut self, analysis: &TargetAnalysis) -> cmig_common::Result<bool> {
        if self.plan.analyses.contains(&analysis.case_id) {
            return Ok(false);
        }

        let exists = with_retry(
            "find_analysis",
            &self.options.retry,
            cmig_common::Error::is_transient,
            || analysis_exists(&self.pool, analysis.case_id),
        )
        .await?;

        self.plan.analyses.insert(analysis.case_id);
        Ok(!exists)
    }
}
