use std::sync::atomic::{AtomicU64, Ordering};

/// Units allotted per node: dispatched, termination recorded, termination observed by the worker
pub const UNITS_PER_JOB: u64 = 3;

/// Operator facing progress of the current execution. Never used for control decisions.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    counter: AtomicU64,
    total: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for an execution expecting `jobs` nodes
    pub fn reset(&self, jobs: usize) {
        self.total.store(jobs as u64 * UNITS_PER_JOB, Ordering::SeqCst);
        self.counter.store(0, Ordering::SeqCst);
    }

    pub fn advance(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed_units(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn total_units(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Percentage in `[0, 100]`; an execution without jobs reports 0
    pub fn percent(&self) -> f64 {
        let total = self.total_units();
        if total == 0 {
            return 0.0;
        }
        100.0 * self.completed_units() as f64 / total as f64
    }

    /// e.g. `"67%"`
    pub fn formatted(&self) -> String {
        format!("{:.0}%", self.percent())
    }
}
