//! Gauges carrying an execution id label.
//!
//! Every label tuple written under an execution id is remembered so that all
//! series of a pruned execution can be deleted in one go. This keeps the
//! exported cardinality bounded by the retention window even though the
//! execution id itself is unbounded over the process lifetime.

use parking_lot::Mutex;
use prometheus::core::Collector as _;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::core::errors::{ControllerError, Result};

pub const LABEL_NODE: &str = "node";
pub const LABEL_EXECUTION_ID: &str = "executionID";
/// Stable label value mirroring the most recent execution
pub const LABEL_VALUE_LATEST: &str = "latest";

/// A `GaugeVec` that tracks the label tuples emitted per execution id
pub struct ExecutionIdGauge {
    gauge: GaugeVec,
    labels: Vec<String>,
    execution_label: usize,
    series: Mutex<HashMap<String, HashSet<Vec<String>>>>,
}

impl ExecutionIdGauge {
    /// `label_names` must contain `executionID`
    pub fn new(opts: Opts, label_names: &[String]) -> Result<Self> {
        let execution_label = label_names
            .iter()
            .position(|l| l == LABEL_EXECUTION_ID)
            .ok_or_else(|| {
                ControllerError::configuration(format!(
                    "gauge {:?} has no {LABEL_EXECUTION_ID} label",
                    opts.name
                ))
            })?;
        let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(opts, &names)?;
        Ok(Self {
            gauge,
            labels: label_names.to_vec(),
            execution_label,
            series: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.gauge.clone()))?;
        Ok(())
    }

    pub fn label_names(&self) -> &[String] {
        &self.labels
    }

    pub fn execution_label_index(&self) -> usize {
        self.execution_label
    }

    /// Set the sample for `values` (ordered like the label names).
    ///
    /// Tuples under `latest` are overwritten in place and never cached.
    pub fn set(&self, values: &[&str], value: f64) -> Result<()> {
        let gauge = self.gauge.get_metric_with_label_values(values)?;
        gauge.set(value);

        let execution_id = values[self.execution_label];
        if execution_id != LABEL_VALUE_LATEST {
            self.series
                .lock()
                .entry(execution_id.to_string())
                .or_default()
                .insert(values.iter().map(|v| v.to_string()).collect());
        }
        Ok(())
    }

    /// Current value of a series, if it exists
    pub fn get(&self, values: &[&str]) -> Option<f64> {
        let metrics = self.gauge.collect();
        let family = metrics.first()?;
        family
            .get_metric()
            .iter()
            .find(|m| {
                self.labels.iter().zip(values).all(|(name, value)| {
                    m.get_label()
                        .iter()
                        .any(|p| p.get_name() == name && p.get_value() == *value)
                })
            })
            .map(|m| m.get_gauge().get_value())
    }

    /// Delete every series recorded under `execution_id`, returning how many were removed
    pub fn prune(&self, execution_id: &str) -> usize {
        let Some(tuples) = self.series.lock().remove(execution_id) else {
            return 0;
        };
        let mut removed = 0;
        for tuple in &tuples {
            let values: Vec<&str> = tuple.iter().map(String::as_str).collect();
            match self.gauge.remove_label_values(&values) {
                Ok(()) => removed += 1,
                Err(e) => debug!(execution_id, error = %e, "series already gone"),
            }
        }
        removed
    }

    /// Number of distinct tuples cached for `execution_id`
    pub fn tracked_series(&self, execution_id: &str) -> usize {
        self.series
            .lock()
            .get(execution_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}
