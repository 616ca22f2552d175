/// Counts checkpoint updates and decides when one must be persisted.
///
/// Only every `every`-th update is written; the counter restarts after a
/// successful write, so a failed write is retried on the next update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointThrottle {
    every: u64,
    pending: u64,
}

impl CheckpointThrottle {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            pending: 0,
        }
    }

    /// Records one update; returns `true` when the checkpoint should be saved.
    pub fn record_update(&mut self) -> bool {
        self.pending = self.pending.saturating_add(1);
        self.pending >= self.every
    }

    pub fn mark_persisted(&mut self) {
        self.pending = 0;
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }
}
