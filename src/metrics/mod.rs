//! Prometheus gauges with execution scoped cardinality management

pub mod cardinality;
pub mod collector;
pub mod results;

pub use cardinality::{ExecutionIdGauge, LABEL_EXECUTION_ID, LABEL_NODE, LABEL_VALUE_LATEST};
pub use collector::{Collector, RESERVED_METRIC_NAMES};
pub use results::{parse_results, validate_results, MetricResult, Results};
