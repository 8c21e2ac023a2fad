//! Validate phase

use super::statistics::PhaseProgress;
use super::MigrationOrchestrator;
use crate::error::MigrationResult;
use crate::models::Phase;
use crate::validator::Validator;
use tracing::info;

impl MigrationOrchestrator {
    /// Dry runs wrote nothing, so there is nothing to check
    pub(super) async fn phase_validate(&mut self) -> MigrationResult<(PhaseProgress, bool)> {
        let progress = PhaseProgress::new(Phase::Validate, 0, 0);

        if self.options.dry_run {
            info!(phase = "validate", "Validation skipped in dry run");
            return Ok((progress, true));
        }

        let report = Validator::new(self.options.sample_size)
            .validate(&self.pool, &self.records)
            .await?;
        let passed = report.passed();
        self.report.validation = Some(report);

        Ok((progress, passed))
    }
}
