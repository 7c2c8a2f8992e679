//! Core types for execution tracking

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `yyyyMMddHHmm`, lexicographic order equals chronological order
pub const EXECUTION_ID_FORMAT: &str = "%Y%m%d%H%M";

pub const STATUS_STARTED: &str = "Started";
pub const STATUS_REPORT_RECEIVED: &str = "ReportReceived";

/// A dispatch unit: one job for one node of one execution
#[async_trait]
pub trait Job: Send + Sync {
    /// Execution this job belongs to
    fn id(&self) -> &str;

    /// Node the job runs on
    fn node(&self) -> &str;

    /// Create the worker pod. Not idempotent; called exactly once per job.
    async fn create_pod(&self) -> anyhow::Result<()>;
}

/// Pod phase reported by the node execution platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dual-signal completion state of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    /// Added to the execution, not yet picked up by a worker
    Pending,
    /// The worker created the pod
    Dispatched,
    /// Termination seen, no report yet
    TerminatedOnly,
    /// Report seen, no termination yet
    ReportedOnly,
    /// Both signals arrived
    Completed,
}

impl PodState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, PodState::TerminatedOnly | PodState::Completed)
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, PodState::ReportedOnly | PodState::Completed)
    }

    pub fn on_dispatch(self) -> Self {
        match self {
            PodState::Pending => PodState::Dispatched,
            other => other,
        }
    }

    pub fn on_terminated(self) -> Self {
        match self {
            PodState::Pending | PodState::Dispatched => PodState::TerminatedOnly,
            PodState::ReportedOnly | PodState::Completed => PodState::Completed,
            PodState::TerminatedOnly => PodState::TerminatedOnly,
        }
    }

    pub fn on_report(self) -> Self {
        match self {
            PodState::Pending | PodState::Dispatched | PodState::ReportedOnly => {
                PodState::ReportedOnly
            }
            PodState::TerminatedOnly | PodState::Completed => PodState::Completed,
        }
    }
}

/// Per-node tracking state within one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub node: String,
    pub started: Option<DateTime<Utc>>,
    pub terminated: Option<DateTime<Utc>>,
    pub report_received: Option<DateTime<Utc>>,
    /// Most recent transition: "Started", a phase name, or "ReportReceived"
    pub status: String,
    pub phase: Option<Phase>,
    pub state: PodState,
    /// The report itself carried a processing error
    pub report_error: bool,
}

impl PodRecord {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            started: None,
            terminated: None,
            report_received: None,
            status: String::new(),
            phase: None,
            state: PodState::Pending,
            report_error: false,
        }
    }

    /// Terminated with a phase other than `Succeeded`, terminated without a
    /// report, or reported a processing error.
    pub fn has_processing_error(&self) -> bool {
        let failed_phase = matches!(self.phase, Some(phase) if phase != Phase::Succeeded);
        let reportless = self.terminated.is_some() && self.report_received.is_none();
        self.report_error || failed_phase || reportless
    }

    /// Milliseconds between start and termination
    pub fn duration_millis(&self) -> Option<i64> {
        match (self.started, self.terminated) {
            (Some(started), Some(terminated)) => {
                Some((terminated - started).num_milliseconds().max(0))
            }
            _ => None,
        }
    }
}

/// Numeric value of an execution id for the current-execution gauge.
/// Collision suffixes (`-001`, `-002`) are ignored.
pub fn execution_id_value(id: &str) -> f64 {
    id.split('-')
        .next()
        .and_then(|base| base.parse::<f64>().ok())
        .unwrap_or(0.0)
}
