// Core infrastructure modules
pub mod core;

// Execution tracking, dispatch and the exported gauges
pub mod dispatch;   // Fan-out entry point for the periodic trigger
pub mod lifecycle;  // Registry, worker pools, progress and retention
pub mod metrics;    // Gauges with execution scoped cardinality

// Re-exports for convenience
pub use crate::core::{Config, ConfigBuilder, ControllerError, MetricSpec, MetricsConfig, Result};
pub use dispatch::{FanOut, FanOutOutcome, JobFactory, NodeInfo, NodeLister};
pub use lifecycle::{
    resolve_latest, ExecutionRegistry, Job, Phase, PodRecord, PodState, ProgressTracker,
    RetentionManager, RetentionOutcome, WorkerPool, LATEST_MARKER,
};
pub use metrics::{
    parse_results, validate_results, Collector, ExecutionIdGauge, MetricResult, Results,
};
