//! Fan-out of one job per usable node.
//!
//! `FanOut::trigger` is what a cron style trigger calls. Overlapping triggers
//! are skipped while a previous fan-out is still enqueuing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::errors::Result;
use crate::lifecycle::{ExecutionRegistry, Job};

/// A worker node as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub unschedulable: bool,
    pub ready: bool,
}

impl NodeInfo {
    /// A ready, schedulable node
    pub fn ready(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unschedulable: false,
            ready: true,
        }
    }

    pub fn is_usable(&self, run_on_unscheduled_nodes: bool) -> bool {
        if self.unschedulable && !run_on_unscheduled_nodes {
            return false;
        }
        self.ready
    }
}

/// Lists candidate nodes
#[async_trait]
pub trait NodeLister: Send + Sync {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>>;
}

/// Renders the job for one node of an execution
#[async_trait]
pub trait JobFactory: Send + Sync {
    async fn job_for(&self, node: &str, execution_id: &str) -> anyhow::Result<Arc<dyn Job>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FanOutOutcome {
    /// A previous fan-out was still running
    Skipped,
    /// Listing nodes or rendering a job failed
    Failed { reason: String },
    Dispatched {
        execution_id: String,
        pods: usize,
        pruned: Vec<String>,
    },
}

pub struct FanOut {
    registry: Arc<ExecutionRegistry>,
    lister: Arc<dyn NodeLister>,
    factory: Arc<dyn JobFactory>,
    running: AtomicBool,
}

/// Clears the running flag however the fan-out ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FanOut {
    pub fn new(
        registry: Arc<ExecutionRegistry>,
        lister: Arc<dyn NodeLister>,
        factory: Arc<dyn JobFactory>,
    ) -> Self {
        Self {
            registry,
            lister,
            factory,
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start one execution over all usable nodes.
    ///
    /// Errors from the registry are returned; collaborator failures end the
    /// cycle as `FanOutOutcome::Failed`.
    pub async fn trigger(&self) -> Result<FanOutOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("last fan-out still running");
            return Ok(FanOutOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);
        self.fan_out().await
    }

    /// Trigger once after the configured delay when `runOnStartup` is set
    pub async fn run_on_startup(&self) -> Result<Option<FanOutOutcome>> {
        let config = self.registry.config();
        if !config.run_on_startup {
            return Ok(None);
        }
        info!(delay_secs = config.startup_delay_secs, "starting on startup");
        tokio::time::sleep(config.startup_delay()).await;
        self.trigger().await.map(Some)
    }

    async fn fan_out(&self) -> Result<FanOutOutcome> {
        let run_on_unscheduled = self.registry.config().run_on_unscheduled_nodes;
        let nodes: Vec<NodeInfo> = match self.lister.list_nodes().await {
            Ok(nodes) => nodes
                .into_iter()
                .filter(|n| n.is_usable(run_on_unscheduled))
                .collect(),
            Err(e) => {
                error!(error = %e, "error listing nodes");
                return Ok(FanOutOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let execution_id = self.registry.new_execution(nodes.len());
        info!(execution_id = %execution_id, nodes = nodes.len(), "executing job");

        for node in &nodes {
            let job = match self.factory.job_for(&node.name, &execution_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(execution_id = %execution_id, node = %node.name, error = %e, "error creating job from template");
                    self.seal_partial(&execution_id);
                    return Ok(FanOutOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
            };
            if let Err(e) = self.registry.add_pod(job).await {
                self.seal_partial(&execution_id);
                return Err(e);
            }
        }

        let retention = self.registry.all_added(&execution_id)?;
        Ok(FanOutOutcome::Dispatched {
            execution_id,
            pods: nodes.len(),
            pruned: retention.pruned,
        })
    }

    /// Seal an aborted execution so its workers can exit
    fn seal_partial(&self, execution_id: &str) {
        if let Err(e) = self.registry.all_added(execution_id) {
            warn!(execution_id = %execution_id, error = %e, "could not seal partial execution");
        }
    }
}
