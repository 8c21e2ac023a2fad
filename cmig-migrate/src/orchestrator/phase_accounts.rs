//! Accounts phase: one account per canonical customer id

use super::statistics::PhaseProgress;
use super::work::remaining_work;
use super::MigrationOrchestrator;
use crate::db::accounts::{find_account_id, insert_account_if_absent};
use crate::error::MigrationResult;
use crate::identity::CanonicalCustomerId;
use crate::mappers::{map_account, MapContext};
use crate::models::{Phase, PhaseCounters, SourceCaseRecord, TargetAccount};
use crate::utils::with_retry;
use std::sync::Arc;
use tracing::info;

impl MigrationOrchestrator {
    pub(super) async fn phase_accounts(&mut self) -> MigrationResult<(PhaseProgress, bool)> {
        let work = Arc::clone(&self.accounts);
        let remaining = remaining_work(
            work.as_slice(),
            self.checkpoint.last_processed(Phase::Accounts),
            |entry| entry.0.as_str(),
        );
        if remaining.restarted {
            self.checkpoint.reset_phase(Phase::Accounts);
        }

        info!(
            phase = "accounts",
            total = work.len(),
            resume_from = remaining.start_index,
            "Starting phase"
        );

        let mut progress = PhaseProgress::new(Phase::Accounts, work.len(), remaining.start_index);
        let batches: Vec<_> = remaining.items.chunks(self.options.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let mut counters = PhaseCounters::default();
            for (canonical, record) in batch {
                self.migrate_account(canonical, record, &mut counters).await;
            }
            if let Some((last, _)) = batch.last() {
                self.finish_batch(
                    Phase::Accounts,
                    last.as_str(),
                    &counters,
                    &mut progress,
                    index + 1 < batch_count,
                )
                .await?;
            }
        }

        let complete = self.checkpoint.counters(Phase::Accounts).failed == 0;
        Ok((progress, complete))
    }

    async fn migrate_account(
        &mut self,
        canonical: &CanonicalCustomerId,
        record: &SourceCaseRecord,
        counters: &mut PhaseCounters,
    ) {
        counters.processed += 1;

        let owner = self.resolver.resolve(&record.actor).await;
        let ctx = MapContext::new(owner.user_id, self.migrated_at);
        let Some(account) = map_account(canonical, record, &ctx) else {
            self.record_skip(Phase::Accounts, canonical.as_str(), "no customer number", counters);
            return;
        };

        let outcome = if self.options.dry_run {
            self.plan_account(&account).await
        } else {
            with_retry(
                "insert_account",
                &self.options.retry,
                cmig_common::Error::is_transient,
                || insert_account_if_absent(&self.pool, &account),
            )
            .await
        };

        self.tally(Phase::Accounts, canonical.as_str(), outcome, counters);
    }

    /// Dry-run stand-in for the insert: would this account be created?
    async fn plan_account(&mut self, account: &TargetAccount) -> cmig_common::Result<bool> {
        if self.plan.accounts.contains_key(&account.customer_number) {
            return Ok(false);
        }

        let existing = with_retry(
            "find_account",
            &self.options.retry,
            cmig_common::Error::is_transient,
            || find_account_id(&self.pool, &account.customer_number),
        )
        .await?;

        self.plan
            .accounts
            .insert(account.customer_number.clone(), existing.unwrap_or(account.id));
        Ok(existing.is_none())
    }
}
