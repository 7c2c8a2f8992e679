//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use batch_job_controller::{Config, ConfigBuilder, ExecutionRegistry, Job, Phase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn config(dir: &TempDir, pool: usize, history: usize) -> ConfigBuilder {
    Config::builder()
        .name("node-check")
        .report_directory(dir.path())
        .pod_pool_size(pool)
        .report_history(history)
        .metrics_prefix("node_check")
}

pub fn registry(dir: &TempDir, pool: usize, history: usize) -> Arc<ExecutionRegistry> {
    ExecutionRegistry::from_config(config(dir, pool, history).build().unwrap()).unwrap()
}

/// How a test pod behaves once created
#[derive(Clone, Copy)]
pub enum Behaviour {
    /// Terminates with the phase after the delay, like a real pod
    Terminates(Phase, Duration),
    /// Never terminates on its own
    Hangs,
    /// Pod creation itself fails
    FailsToCreate,
}

pub struct TestJob {
    pub id: String,
    pub node: String,
    pub created: Arc<AtomicUsize>,
    pub registry: Weak<ExecutionRegistry>,
    pub behaviour: Behaviour,
}

impl TestJob {
    pub fn new(registry: &Arc<ExecutionRegistry>, id: &str, node: &str, behaviour: Behaviour) -> Self {
        Self {
            id: id.to_string(),
            node: node.to_string(),
            created: Arc::new(AtomicUsize::new(0)),
            registry: Arc::downgrade(registry),
            behaviour,
        }
    }

    pub fn hanging(registry: &Arc<ExecutionRegistry>, id: &str, node: &str) -> Self {
        Self::new(registry, id, node, Behaviour::Hangs)
    }

    pub fn succeeding(registry: &Arc<ExecutionRegistry>, id: &str, node: &str) -> Self {
        Self::new(
            registry,
            id,
            node,
            Behaviour::Terminates(Phase::Succeeded, Duration::from_millis(5)),
        )
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for TestJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn node(&self) -> &str {
        &self.node
    }

    async fn create_pod(&self) -> anyhow::Result<()> {
        if let Behaviour::FailsToCreate = self.behaviour {
            anyhow::bail!("pods \"{}\" is forbidden", self.node);
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        if let Behaviour::Terminates(phase, delay) = self.behaviour {
            let registry = self.registry.clone();
            let id = self.id.clone();
            let node = self.node.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(registry) = registry.upgrade() {
                    let _ = registry.pod_terminated(&id, &node, phase);
                }
            });
        }
        Ok(())
    }
}

/// Poll `condition` every 10ms for up to five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
