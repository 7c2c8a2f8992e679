//! Result payloads delivered by job callbacks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::config::MetricsConfig;
use crate::core::errors::{ControllerError, Result};

/// A single gauge sample reported by a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl MetricResult {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}

/// Samples keyed by metric base name
pub type Results = HashMap<String, Vec<MetricResult>>;

/// Decode a JSON results body
pub fn parse_results(body: &[u8]) -> Result<Results> {
    Ok(serde_json::from_slice(body)?)
}

/// Check a decoded results body before it reaches the registry
pub fn validate_results(results: &Results, metrics: &MetricsConfig) -> Result<()> {
    if results.is_empty() {
        return Err(ControllerError::validation("results must not be empty"));
    }
    for name in results.keys() {
        if !is_valid_metric_name(&metrics.name_for(name)) {
            return Err(ControllerError::validation_field(
                format!("{name:?} is not a valid metric name"),
                name.clone(),
            ));
        }
    }
    Ok(())
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
