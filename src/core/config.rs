use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::errors::{ControllerError, Result};

/// Environment variable overriding the report directory from the config file
pub const ENV_REPORT_DIRECTORY: &str = "REPORT_DIRECTORY";

const DEFAULT_METRICS_PORT: u16 = 9153;
const DEFAULT_STARTUP_DELAY_SECS: u64 = 10;

/// Controller configuration, consumed read-only by the registry and its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Name of the controller, used for pod names and the info gauge
    pub name: String,
    /// Cron expression evaluated by the external trigger
    pub cron_expression: String,
    /// Root directory holding one sub directory per execution
    pub report_directory: PathBuf,
    /// Number of executions kept on disk and in metrics (plus one slot for `latest`)
    pub report_history: usize,
    /// Number of concurrently dispatched jobs per execution
    pub pod_pool_size: usize,
    /// Also emit every execution scoped sample with `executionID="latest"`
    pub latest_metrics_label: bool,
    /// Run one fan-out right after startup
    pub run_on_startup: bool,
    /// Delay before the startup fan-out
    pub startup_delay_secs: u64,
    /// Also dispatch to nodes flagged unschedulable
    pub run_on_unscheduled_nodes: bool,
    /// Upper bound for waiting on a pod's termination signal; `None` waits forever
    pub completion_timeout_secs: Option<u64>,
    pub metrics: MetricsConfig,
    /// Free-form values handed through to job templates
    pub custom: HashMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "batch-job".to_string(),
            cron_expression: "0 0 * * *".to_string(),
            report_directory: PathBuf::from("/var/www"),
            report_history: 30,
            pod_pool_size: 10,
            latest_metrics_label: false,
            run_on_startup: false,
            startup_delay_secs: DEFAULT_STARTUP_DELAY_SECS,
            run_on_unscheduled_nodes: false,
            completion_timeout_secs: None,
            metrics: MetricsConfig::default(),
            custom: HashMap::new(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfig {
    pub port: u16,
    /// Prefix prepended to every exported metric name
    pub prefix: String,
    /// Operator defined gauges, keyed by base name
    pub gauges: HashMap<String, MetricSpec>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_METRICS_PORT,
            prefix: "batch_job".to_string(),
            gauges: HashMap::new(),
        }
    }
}

impl MetricsConfig {
    /// Full exported name for a metric base name
    pub fn name_for(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    pub fn bind_address(&self) -> String {
        format!(":{}", self.port)
    }
}

/// An operator defined gauge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSpec {
    pub help: String,
    pub labels: Vec<String>,
}

impl Config {
    /// Create a new builder for Config
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Parse a YAML document and apply environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(yaml)?;
        cfg.apply_report_directory_override(std::env::var(ENV_REPORT_DIRECTORY).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read the config file at `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn apply_report_directory_override(&mut self, value: Option<String>) {
        if let Some(dir) = value.filter(|d| !d.is_empty()) {
            info!(
                env = ENV_REPORT_DIRECTORY,
                report_directory = %dir,
                "override report directory from env"
            );
            self.report_directory = PathBuf::from(dir);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.pod_pool_size == 0 {
            return Err(ControllerError::configuration_field(
                "podPoolSize must be greater than 0",
                "podPoolSize",
            ));
        }
        if self.report_history == 0 {
            return Err(ControllerError::configuration_field(
                "reportHistory must be greater than 0",
                "reportHistory",
            ));
        }
        if self.metrics.prefix.is_empty() {
            return Err(ControllerError::configuration_field(
                "metrics prefix must not be empty",
                "metrics.prefix",
            ));
        }
        if self.report_directory.as_os_str().is_empty() {
            return Err(ControllerError::configuration_field(
                "reportDirectory must not be empty",
                "reportDirectory",
            ));
        }
        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_secs.map(Duration::from_secs)
    }

    /// Name of the worker pod for a node and execution
    pub fn pod_name(&self, node: &str, execution_id: &str) -> String {
        let host = node.split('.').next().unwrap_or(node);
        format!("{}-job-{}-{}", self.name, host, execution_id)
    }

    pub fn report_dir(&self, execution_id: &str) -> PathBuf {
        self.report_directory.join(execution_id)
    }

    pub fn report_file_name(&self, execution_id: &str, name: &str) -> PathBuf {
        self.report_dir(execution_id).join(name)
    }

    pub fn mk_report_dir(&self, execution_id: &str) -> Result<()> {
        let dir = self.report_dir(execution_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ControllerError::io(format!("create {}", dir.display()), e))
    }

    /// Health check: the report root must exist
    pub fn report_dir_exists(&self) -> Result<()> {
        if self.report_directory.is_dir() {
            Ok(())
        } else {
            Err(ControllerError::io(
                format!("stat {}", self.report_directory.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "report directory missing"),
            ))
        }
    }
}

/// Builder for Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn report_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_directory = dir.into();
        self
    }

    pub fn report_history(mut self, history: usize) -> Self {
        self.config.report_history = history;
        self
    }

    pub fn pod_pool_size(mut self, size: usize) -> Self {
        self.config.pod_pool_size = size;
        self
    }

    pub fn latest_metrics_label(mut self, enabled: bool) -> Self {
        self.config.latest_metrics_label = enabled;
        self
    }

    pub fn run_on_unscheduled_nodes(mut self, enabled: bool) -> Self {
        self.config.run_on_unscheduled_nodes = enabled;
        self
    }

    pub fn completion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.completion_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metrics.prefix = prefix.into();
        self
    }

    /// Register an operator defined gauge
    pub fn gauge(mut self, name: impl Into<String>, help: impl Into<String>, labels: &[&str]) -> Self {
        self.config.metrics.gauges.insert(
            name.into(),
            MetricSpec {
                help: help.into(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
