use crate::models::Stage;

/// Running tallies for one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    /// Permanent per-record rejections (`no_content`, `invalid_url`).
    pub rejected: usize,
    pub failed: usize,
}

impl StageCounters {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }
}

/// Receives periodic snapshots of a running stage.
pub trait ProgressSink: Send + Sync {
    fn checkpoint(&self, stage: Stage, counters: &StageCounters);
}

/// Logs every checkpoint at info level.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn checkpoint(&self, stage: Stage, counters: &StageCounters) {
        tracing::info!(
            %stage,
            processed = counters.processed,
            total = counters.total,
            succeeded = counters.succeeded,
            rejected = counters.rejected,
            failed = counters.failed,
            "progress"
        );
    }
}
