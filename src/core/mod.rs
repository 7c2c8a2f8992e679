// Core infrastructure shared by the lifecycle engine and the metrics layer

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, MetricSpec, MetricsConfig, ENV_REPORT_DIRECTORY};
pub use errors::{ControllerError, Result};
