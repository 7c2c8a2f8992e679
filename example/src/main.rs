use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

use batch_job_controller::{
    Config, ExecutionRegistry, FanOut, FanOutOutcome, Job, JobFactory, MetricResult, NodeInfo,
    NodeLister, Phase, Results,
};

// A cluster of three nodes, one of them cordoned
struct SimulatedCluster;

#[async_trait]
impl NodeLister for SimulatedCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(vec![
            NodeInfo::ready("worker-1.cluster.local"),
            NodeInfo::ready("worker-2.cluster.local"),
            NodeInfo {
                unschedulable: true,
                ..NodeInfo::ready("worker-3.cluster.local")
            },
        ])
    }
}

struct SimulatedJobs {
    registry: Weak<ExecutionRegistry>,
}

#[async_trait]
impl JobFactory for SimulatedJobs {
    async fn job_for(&self, node: &str, execution_id: &str) -> Result<Arc<dyn Job>> {
        Ok(Arc::new(SimulatedPod {
            id: execution_id.to_string(),
            node: node.to_string(),
            registry: self.registry.clone(),
        }))
    }
}

// Pretends to run a scan on its node, report back, then terminate
struct SimulatedPod {
    id: String,
    node: String,
    registry: Weak<ExecutionRegistry>,
}

#[async_trait]
impl Job for SimulatedPod {
    fn id(&self) -> &str {
        &self.id
    }

    fn node(&self) -> &str {
        &self.node
    }

    async fn create_pod(&self) -> Result<()> {
        let registry = self.registry.clone();
        let id = self.id.clone();
        let node = self.node.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let results: Results = [(
                "packages".to_string(),
                vec![MetricResult::new(2.0).with_label("package", "openssl")],
            )]
            .into_iter()
            .collect();
            registry.report_received(&id, &node, None, &results);
            if let Err(e) = registry.pod_terminated(&id, &node, Phase::Succeeded) {
                tracing::warn!(error = %e, "termination not recorded");
            }
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let report_root = std::env::temp_dir().join("batch-job-demo");
    std::fs::create_dir_all(&report_root).context("create report root")?;

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::builder()
            .name("node-check")
            .report_directory(&report_root)
            .report_history(2)
            .pod_pool_size(2)
            .latest_metrics_label(true)
            .gauge("packages", "outdated packages", &["package"])
            .build()?,
    };

    config.report_dir_exists()?;
    info!(
        report_directory = %config.report_directory.display(),
        metrics = %config.metrics.bind_address(),
        "configuration loaded"
    );

    let registry = ExecutionRegistry::from_config(config)?;
    let fan_out = FanOut::new(
        Arc::clone(&registry),
        Arc::new(SimulatedCluster),
        Arc::new(SimulatedJobs {
            registry: Arc::downgrade(&registry),
        }),
    );

    for _ in 0..3 {
        if let FanOutOutcome::Dispatched { execution_id, pods, pruned } = fan_out.trigger().await? {
            info!(execution_id = %execution_id, pods, ?pruned, "fan-out dispatched");
            registry.wait_for_completion(&execution_id).await?;
            info!(execution_id = %execution_id, progress = %registry.progress(), "execution finished");
        }
    }

    println!("{}", registry.collector().encode_text()?);
    Ok(())
}
