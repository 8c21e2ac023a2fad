//! Cases phase: one case per source record, linked to its account

use super::statistics::PhaseProgress;
use super::work::remaining_work;
use super::MigrationOrchestrator;
use crate::db::accounts::load_account_index;
use crate::db::cases::{find_case_link, insert_case_if_absent, CaseLink};
use crate::error::MigrationResult;
use crate::identity::canonical_id_of;
use crate::mappers::{map_case, MapContext};
use crate::models::{Phase, PhaseCounters, RecordErrorKind, SourceCaseRecord, TargetCase};
use crate::utils::with_retry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

impl MigrationOrchestrator {
    pub(super) async fn phase_cases(&mut self) -> MigrationResult<(PhaseProgress, bool)> {
        let work = Arc::clone(&self.records);
        let remaining = remaining_work(
            work.as_slice(),
            self.checkpoint.last_processed(Phase::Cases),
            |record| record.source_id.as_str(),
        );
        if remaining.restarted {
            self.checkpoint.reset_phase(Phase::Cases);
        }

        let mut account_index = with_retry(
            "load_account_index",
            &self.options.retry,
            cmig_common::Error::is_transient,
            || load_account_index(&self.pool),
        )
        .await?;
        if self.options.dry_run {
            for (customer_number, id) in &self.plan.accounts {
                account_index.entry(customer_number.clone()).or_insert(*id);
            }
        }

        info!(
            phase = "cases",
            total = work.len(),
            resume_from = remaining.start_index,
            accounts = account_index.len(),
            "Starting phase"
        );

        let mut progress = PhaseProgress::new(Phase::Cases, work.len(), remaining.start_index);
        let batches: Vec<_> = remaining.items.chunks(self.options.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let mut counters = PhaseCounters::default();
            for record in batch {
                self.migrate_case(record, &account_index, &mut counters).await;
            }
            if let Some(last) = batch.last() {
                self.finish_batch(
                    Phase::Cases,
                    &last.source_id,
                    &counters,
                    &mut progress,
                    index + 1 < batch_count,
                )
                .await?;
            }
        }

        let complete = self.checkpoint.counters(Phase::Cases).failed == 0;
        Ok((progress, complete))
    }

    async fn migrate_case(
        &mut self,
        record: &SourceCaseRecord,
        account_index: &HashMap<String, Uuid>,
        counters: &mut PhaseCounters,
    ) {
        counters.processed += 1;

        let Some(canonical) = canonical_id_of(record) else {
            self.record_skip(Phase::Cases, &record.source_id, "no customer identifier", counters);
            return;
        };
        let Some(&account_id) = account_index.get(canonical.as_str()) else {
            self.record_failure(
                Phase::Cases,
                &record.source_id,
                RecordErrorKind::Integrity,
                format!("account {canonical} does not exist"),
                counters,
            );
            return;
        };

        let owner = self.resolver.resolve(&record.actor).await;
        let ctx = MapContext::new(owner.user_id, self.migrated_at);
        let Some(case) = map_case(record, account_id, &ctx) else {
            self.record_skip(Phase::Cases, &record.source_id, "case is missing required fields", counters);
            return;
        };

        let outcome = if self.options.dry_run {
            self.plan_case(&case).await
        } else {
            with_retry(
                "insert_case",
                &self.options.retry,
                cmig_common::Error::is_transient,
                || insert_case_if_absent(&self.pool, &case),
            )
            .await
        };

        self.tally(Phase::Cases, &record.source_id, outcome, counters);
    }

    async fn plan_case(&mut self, case: &TargetCase) -> cmig_common::Result<bool> {
        if self.plan.cases.contains_key(&case.case_number) {
            return Ok(false);
        }

        let existing = with_retry(
            "find_case",
            &self.options.retry,
            cmig_common::Error::is_transient,
            || find_case_link(&self.pool, &case.case_number),
        )
        .await?;

        let link = existing.unwrap_or(CaseLink {
            id: case.id,
            account_id: case.account_id,
        });
        self.plan.cases.insert(case.case_number.clone(), link);
        Ok(existing.is_none())
    }
}
