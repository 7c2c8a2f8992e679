//! Exported gauges of the controller.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::errors::{ControllerError, Result};
use crate::metrics::cardinality::{
    ExecutionIdGauge, LABEL_EXECUTION_ID, LABEL_NODE, LABEL_VALUE_LATEST,
};
use crate::metrics::results::MetricResult;

pub const CURRENT_EXECUTION_METRIC: &str = "current_execution_id";
pub const PROCESSING_METRIC: &str = "processing";
pub const DURATION_METRIC: &str = "duration";
pub const PODS_METRIC: &str = "pods";
/// Base names operator gauges may not use
pub const RESERVED_METRIC_NAMES: [&str; 3] = [PROCESSING_METRIC, DURATION_METRIC, PODS_METRIC];

const INFO_METRIC: &str = "batch_job_controller_info";

const CURRENT_EXECUTION_HELP: &str = "The current execution ID";
const PROCESSING_HELP: &str = "Node with processing error, 1: has error / 0: no error";
const DURATION_HELP: &str = "Execution Duration in milliseconds";
const PODS_HELP: &str = "The number of pods started for the last execution";
const INFO_HELP: &str = "Information about the batch job controller";

/// Owns every gauge the controller exports, backed by its own registry
pub struct Collector {
    registry: Registry,
    execution_id: Gauge,
    processing: ExecutionIdGauge,
    duration: ExecutionIdGauge,
    pods: Gauge,
    gauges: HashMap<String, ExecutionIdGauge>,
    latest_metric: bool,
}

impl Collector {
    /// Build and register all gauges. Fails on reserved or invalid operator gauges.
    pub fn new(cfg: &Config) -> Result<Self> {
        let metrics = &cfg.metrics;
        let registry = Registry::new();

        let execution_id = Gauge::with_opts(Opts::new(
            metrics.name_for(CURRENT_EXECUTION_METRIC),
            CURRENT_EXECUTION_HELP,
        ))?;
        let pods = Gauge::with_opts(Opts::new(metrics.name_for(PODS_METRIC), PODS_HELP))?;

        let node_and_execution = vec![LABEL_NODE.to_string(), LABEL_EXECUTION_ID.to_string()];
        let processing = ExecutionIdGauge::new(
            Opts::new(metrics.name_for(PROCESSING_METRIC), PROCESSING_HELP),
            &node_and_execution,
        )?;
        let duration = ExecutionIdGauge::new(
            Opts::new(metrics.name_for(DURATION_METRIC), DURATION_HELP),
            &node_and_execution,
        )?;

        let mut gauges = HashMap::new();
        for (name, spec) in &metrics.gauges {
            if RESERVED_METRIC_NAMES.contains(&name.as_str()) {
                return Err(ControllerError::configuration_field(
                    format!(
                        "the metric name {name:?} is not allowed, it's one of the reserved names: {RESERVED_METRIC_NAMES:?}"
                    ),
                    format!("metrics.gauges.{name}"),
                ));
            }
            let labels = enrich_labels(&spec.labels);
            let gauge = ExecutionIdGauge::new(Opts::new(metrics.name_for(name), &spec.help), &labels)
                .map_err(|e| {
                    ControllerError::configuration_field(
                        format!("invalid gauge {name:?}: {e}"),
                        format!("metrics.gauges.{name}"),
                    )
                })?;
            gauges.insert(name.clone(), gauge);
        }

        registry.register(Box::new(execution_id.clone()))?;
        registry.register(Box::new(pods.clone()))?;
        processing.register(&registry)?;
        duration.register(&registry)?;
        for gauge in gauges.values() {
            gauge.register(&registry)?;
        }

        let info = GaugeVec::new(
            Opts::new(INFO_METRIC, INFO_HELP),
            &["version", "name", "prefix", "poolSize", "reportHistory"],
        )?;
        registry.register(Box::new(info.clone()))?;
        let pool_size = cfg.pod_pool_size.to_string();
        let report_history = cfg.report_history.to_string();
        info.with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            cfg.name.as_str(),
            metrics.prefix.as_str(),
            pool_size.as_str(),
            report_history.as_str(),
        ])
        .set(1.0);

        Ok(Self {
            registry,
            execution_id,
            processing,
            duration,
            pods,
            gauges,
            latest_metric: cfg.latest_metrics_label,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::internal(e.to_string()))
    }

    pub fn execution_started(&self, execution_id: f64) {
        self.execution_id.set(execution_id);
    }

    /// Number of pods started for the current execution
    pub fn pods(&self, count: f64) {
        self.pods.set(count);
    }

    pub fn processing_finished(&self, node: &str, execution_id: &str, failed: bool) {
        let value = if failed { 1.0 } else { 0.0 };
        self.set_node_sample(&self.processing, node, execution_id, value);
    }

    /// Duration in milliseconds
    pub fn duration(&self, node: &str, execution_id: &str, millis: f64) {
        self.set_node_sample(&self.duration, node, execution_id, millis);
    }

    /// Record one operator defined sample. Unknown gauge names are ignored.
    pub fn metric_for(&self, execution_id: &str, node: &str, name: &str, result: &MetricResult) {
        let Some(gauge) = self.gauges.get(name) else {
            debug!(metric = name, "no gauge configured, skipping result");
            return;
        };
        let mut labels = result.labels.clone();
        labels.insert(LABEL_NODE.to_string(), node.to_string());
        labels.insert(LABEL_EXECUTION_ID.to_string(), execution_id.to_string());

        let mut values: Vec<&str> = gauge
            .label_names()
            .iter()
            .map(|l| labels.get(l).map(String::as_str).unwrap_or(""))
            .collect();

        if let Err(e) = gauge.set(&values, result.value) {
            warn!(metric = name, node, execution_id, error = %e, "could not record result");
            return;
        }
        if self.latest_metric {
            values[gauge.execution_label_index()] = LABEL_VALUE_LATEST;
            if let Err(e) = gauge.set(&values, result.value) {
                warn!(metric = name, node, error = %e, "could not record latest result");
            }
        }
    }

    /// Delete all series recorded under `execution_id`
    pub fn prune(&self, execution_id: &str) -> usize {
        let mut removed = self.processing.prune(execution_id) + self.duration.prune(execution_id);
        for gauge in self.gauges.values() {
            removed += gauge.prune(execution_id);
        }
        debug!(execution_id, removed, "pruned execution metrics");
        removed
    }

    pub fn processing_value(&self, node: &str, execution_id: &str) -> Option<f64> {
        self.processing.get(&[node, execution_id])
    }

    pub fn duration_value(&self, node: &str, execution_id: &str) -> Option<f64> {
        self.duration.get(&[node, execution_id])
    }

    pub fn current_execution_id(&self) -> f64 {
        self.execution_id.get()
    }

    pub fn pods_value(&self) -> f64 {
        self.pods.get()
    }

    fn set_node_sample(&self, gauge: &ExecutionIdGauge, node: &str, execution_id: &str, value: f64) {
        if let Err(e) = gauge.set(&[node, execution_id], value) {
            warn!(node, execution_id, error = %e, "could not record sample");
            return;
        }
        if self.latest_metric {
            if let Err(e) = gauge.set(&[node, LABEL_VALUE_LATEST], value) {
                warn!(node, error = %e, "could not record latest sample");
            }
        }
    }
}

/// Append `node` and `executionID` to operator labels unless already declared
fn enrich_labels(labels: &[String]) -> Vec<String> {
    let mut out = labels.to_vec();
    for required in [LABEL_NODE, LABEL_EXECUTION_ID] {
        if !out.iter().any(|l| l == required) {
            out.push(required.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(latest: bool) -> Config {
        Config::builder()
            .metrics_prefix("test")
            .latest_metrics_label(latest)
            .gauge("packages", "outdated packages", &["package"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_enrich_labels() {
        assert_eq!(
            enrich_labels(&["package".to_string()]),
            vec!["package", "node", "executionID"]
        );
        assert_eq!(
            enrich_labels(&["executionID".to_string(), "node".to_string()]),
            vec!["executionID", "node"]
        );
    }

    #[test]
    fn test_reserved_names_rejected() {
        for reserved in RESERVED_METRIC_NAMES {
            let cfg = Config::builder().gauge(reserved, "clash", &[]).build().unwrap();
            assert!(matches!(
                Collector::new(&cfg),
                Err(ControllerError::Configuration { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_label_rejected() {
        let cfg = Config::builder()
            .gauge("packages", "bad label", &["not-valid"])
            .build()
            .unwrap();
        assert!(matches!(
            Collector::new(&cfg),
            Err(ControllerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_node_samples() {
        let collector = Collector::new(&config(false)).unwrap();
        collector.processing_finished("node-a", "202401011200", true);
        collector.duration("node-a", "202401011200", 1500.0);
        collector.pods(4.0);
        collector.execution_started(202401011200.0);

        assert_eq!(collector.processing_value("node-a", "202401011200"), Some(1.0));
        assert_eq!(collector.duration_value("node-a", "202401011200"), Some(1500.0));
        assert_eq!(collector.processing_value("node-a", LABEL_VALUE_LATEST), None);
        assert_eq!(collector.pods_value(), 4.0);
        assert_eq!(collector.current_execution_id(), 202401011200.0);
    }

    #[test]
    fn test_custom_metric_and_prune() {
        let collector = Collector::new(&config(true)).unwrap();
        let result = MetricResult::new(3.0).with_label("package", "openssl");
        collector.metric_for("202401011200", "node-a", "packages", &result);
        collector.metric_for("202401011200", "node-a", "unknown", &result);

        let text = collector.encode_text().unwrap();
        assert!(text.contains(
            r#"test_packages{executionID="202401011200",node="node-a",package="openssl"} 3"#
        ));
        assert!(text.contains(
            r#"test_packages{executionID="latest",node="node-a",package="openssl"} 3"#
        ));

        collector.prune("202401011200");
        let text = collector.encode_text().unwrap();
        assert!(!text.contains(r#"executionID="202401011200""#));
        assert!(text.contains(r#"executionID="latest""#));
    }

    #[test]
    fn test_info_gauge() {
        let collector = Collector::new(&config(false)).unwrap();
        let text = collector.encode_text().unwrap();
        assert!(text.contains("batch_job_controller_info{"));
        assert!(text.contains(r#"prefix="test""#));
    }
}
