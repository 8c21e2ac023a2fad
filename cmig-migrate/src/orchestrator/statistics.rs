//! Phase progress tracking
//!
//! Display: "Processed X of Z (N/s)" after each batch

use crate::models::{Phase, PhaseCounters};
use std::time::{Duration, Instant};
use tracing::info;

/// Progress of one phase within the current invocation
#[derive(Debug)]
pub struct PhaseProgress {
    phase: Phase,
    /// Work items in the whole phase
    total: usize,
    /// Items finished before this invocation started
    resumed_at: usize,
    /// Counters for this invocation only
    counters: PhaseCounters,
    batches: usize,
    started: Instant,
}

impl PhaseProgress {
    pub fn new(phase: Phase, total: usize, resumed_at: usize) -> Self {
        Self {
            phase,
            total,
            resumed_at,
            counters: PhaseCounters::default(),
            batches: 0,
            started: Instant::now(),
        }
    }

    pub fn record_batch(&mut self, batch: &PhaseCounters) {
        self.counters.add(batch);
        self.batches += 1;
    }

    pub fn counters(&self) -> PhaseCounters {
        self.counters
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn resumed_at(&self) -> usize {
        self.resumed_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records per second in this invocation
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.counters.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Position in the full phase, resumed items included
    pub fn position(&self) -> usize {
        self.resumed_at + self.counters.processed as usize
    }

    pub fn display_string(&self) -> String {
        format!(
            "Processed {} of {} ({:.1}/s)",
            self.position(),
            self.total,
            self.throughput()
        )
    }

    pub fn log_batch(&self) {
        info!(
            phase = %self.phase,
            batch = self.batches,
            processed = self.position(),
            total = self.total,
            created = self.counters.created,
            existing = self.counters.existing,
            skipped = self.counters.skipped,
            failed = self.counters.failed,
            elapsed_ms = self.elapsed().as_millis() as u64,
            per_second = format!("{:.1}", self.throughput()),
            "{}",
            self.display_string()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_includes_resumed_items() {
        let mut progress = PhaseProgress::new(Phase::Cases, 100, 40);
        progress.record_batch(&PhaseCounters {
            processed: 10,
            created: 8,
            existing: 2,
            ..Default::default()
        });
        assert_eq!(progress.position(), 50);
        assert_eq!(progress.counters().created, 8);
        assert!(progress.display_string().starts_with("Processed 50 of 100"));
    }
}
