//! Execution tracking and dispatch

pub mod execution;
pub mod progress;
pub mod registry;
pub mod retention;
pub mod types;
pub mod worker;

pub use execution::Execution;
pub use progress::{ProgressTracker, UNITS_PER_JOB};
pub use registry::ExecutionRegistry;
pub use retention::{point_latest, resolve_latest, RetentionManager, RetentionOutcome, LATEST_MARKER};
pub use types::{execution_id_value, Job, Phase, PodRecord, PodState, EXECUTION_ID_FORMAT};
pub use worker::WorkerPool;
