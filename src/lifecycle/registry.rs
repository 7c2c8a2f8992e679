//! Registry of in-flight and historical executions.
//!
//! The registry is the single owner of execution state. It is called
//! concurrently by the fan-out trigger, by the observer of pod lifecycle
//! events and by the callback ingestion layer; all shared maps are `DashMap`s
//! and no guard is held across an `.await`.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::config::Config;
use crate::core::errors::{ControllerError, Result};
use crate::lifecycle::execution::{Execution, JobReceiver};
use crate::lifecycle::progress::ProgressTracker;
use crate::lifecycle::retention::{point_latest, RetentionManager, RetentionOutcome};
use crate::lifecycle::types::{execution_id_value, Job, Phase, PodRecord, EXECUTION_ID_FORMAT};
use crate::lifecycle::worker::{WorkerContext, WorkerPool};
use crate::metrics::{Collector, Results};

pub struct ExecutionRegistry {
    config: Config,
    collector: Arc<Collector>,
    executions: DashMap<String, Arc<Execution>>,
    progress: Arc<ProgressTracker>,
    retention: RetentionManager,
}

impl ExecutionRegistry {
    pub fn new(config: Config, collector: Arc<Collector>) -> Arc<Self> {
        let retention = RetentionManager::new(config.report_directory.clone(), config.report_history);
        Arc::new(Self {
            config,
            collector,
            executions: DashMap::new(),
            progress: Arc::new(ProgressTracker::new()),
            retention,
        })
    }

    /// Validate `config` and build the collector it describes
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        let collector = Arc::new(Collector::new(&config)?);
        Ok(Self::new(config, collector))
    }

    /// Start a new execution expecting `expected_jobs` nodes and return its id.
    ///
    /// Starts the worker pool, creates the report directory and repoints the
    /// latest marker. Filesystem failures are logged, never returned.
    ///
    /// Must be called from within a Tokio runtime, the workers are spawned on it.
    pub fn new_execution(self: &Arc<Self>, expected_jobs: usize) -> String {
        let (execution, queue) = self.register_execution(Utc::now());
        let id = execution.id().to_string();

        self.progress.reset(expected_jobs);
        self.collector.execution_started(execution_id_value(&id));
        self.collector.pods(expected_jobs as f64);

        if let Err(e) = self.config.mk_report_dir(&id) {
            error!(execution_id = %id, error = %e, "could not create report directory");
        }
        if let Err(e) = point_latest(&self.config.report_directory, &id) {
            error!(execution_id = %id, error = %e, "could not update latest marker");
        }

        let ctx = WorkerContext {
            registry: Arc::downgrade(self),
            execution: Arc::clone(&execution),
            progress: Arc::clone(&self.progress),
            completion_timeout: self.config.completion_timeout(),
        };
        execution.attach_workers(WorkerPool::start(ctx, queue, self.config.pod_pool_size));

        info!(
            execution_id = %id,
            expected_jobs,
            pool_size = self.config.pod_pool_size,
            "new execution"
        );
        id
    }

    /// Reserve a fresh id for `now`, suffixing `-001`, `-002`, ... on collisions.
    /// The fixed width keeps lexicographic order chronological.
    fn register_execution(&self, now: DateTime<Utc>) -> (Arc<Execution>, JobReceiver) {
        let base = now.format(EXECUTION_ID_FORMAT).to_string();
        let mut attempt = 0usize;
        loop {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt:03}")
            };
            attempt += 1;

            if self.config.report_dir(&candidate).exists() {
                continue;
            }
            if let Entry::Vacant(slot) = self.executions.entry(candidate.clone()) {
                let (execution, queue) = Execution::new(candidate, self.config.pod_pool_size);
                let execution = Arc::new(execution);
                slot.insert(Arc::clone(&execution));
                return (execution, queue);
            }
        }
    }

    /// Track `job` and hand it to the execution's workers.
    ///
    /// Waits while the queue is full. The node is only tracked once a queue
    /// slot is reserved, so dropping the future while it waits leaves no trace.
    pub async fn add_pod(&self, job: Arc<dyn Job>) -> Result<()> {
        let execution = self.lookup(job.id())?;
        let id = execution.id().to_string();
        let node = job.node().to_string();

        let sender = execution.sender().ok_or_else(|| ControllerError::AlreadySealed {
            execution_id: id.clone(),
        })?;
        if execution.has_node(&node) {
            return Err(ControllerError::DuplicateNode {
                execution_id: id,
                node,
            });
        }

        // workers are gone once the execution was pruned meanwhile
        let permit = sender
            .reserve()
            .await
            .map_err(|_| ControllerError::execution_not_found(id.clone()))?;
        execution.insert_pod(&node)?;
        permit.send(job);

        debug!(execution_id = %id, node = %node, "pod added");
        Ok(())
    }

    /// Seal the execution's queue and enforce the retention window
    pub fn all_added(&self, id: &str) -> Result<RetentionOutcome> {
        let execution = self.lookup(id)?;
        if !execution.seal() {
            return Err(ControllerError::AlreadySealed {
                execution_id: id.to_string(),
            });
        }
        info!(execution_id = %id, pods = execution.pod_count(), "all pods added");

        match self.retention.enforce(|victim| self.forget(victim)) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(execution_id = %id, error = %e, "could not enforce report history");
                Ok(RetentionOutcome::default())
            }
        }
    }

    /// Record the termination signal of a node's pod.
    ///
    /// Lookup failures are `is_not_found()` errors; they are expected for
    /// signals that outlive a pruned execution. A repeated signal is a no-op.
    pub fn pod_terminated(&self, id: &str, node: &str, phase: Phase) -> Result<()> {
        let execution = self.lookup(id)?;
        let Some(record) = execution.mark_terminated(node, phase)? else {
            debug!(execution_id = %id, node = %node, phase = %phase, "pod already terminated");
            return Ok(());
        };
        self.progress.advance();

        self.record_samples(&execution, || {
            if let Some(millis) = record.duration_millis() {
                self.collector.duration(node, id, millis as f64);
            }
            self.collector
                .processing_finished(node, id, record.has_processing_error());
        });

        info!(execution_id = %id, node = %node, phase = %phase, "pod terminated");
        Ok(())
    }

    /// Record a validated report callback. Unknown executions or nodes are ignored.
    pub fn report_received(
        &self,
        id: &str,
        node: &str,
        processing_error: Option<&dyn StdError>,
        results: &Results,
    ) {
        let Some(execution) = self.get(id) else {
            debug!(execution_id = %id, node = %node, "report for unknown execution dropped");
            return;
        };
        let Some(record) = execution.mark_report(node, processing_error.is_some()) else {
            debug!(execution_id = %id, node = %node, "report for unknown node dropped");
            return;
        };
        if let Some(e) = processing_error {
            warn!(execution_id = %id, node = %node, error = %e, "job reported a processing error");
        }

        self.record_samples(&execution, || {
            for (name, samples) in results {
                for sample in samples {
                    self.collector.metric_for(id, node, name, sample);
                }
            }
            self.collector
                .processing_finished(node, id, record.has_processing_error());
        });

        info!(execution_id = %id, node = %node, "report received");
    }

    /// The node was added to the execution and the execution is still tracked
    pub fn has(&self, node: &str, id: &str) -> bool {
        self.get(id).map(|e| e.has_node(node)).unwrap_or(false)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn pod_record(&self, id: &str, node: &str) -> Option<PodRecord> {
        self.get(id)?.record(node)
    }

    /// Tracked execution ids, oldest first
    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Progress of the current execution, e.g. `"67%"`
    pub fn progress(&self) -> String {
        self.progress.formatted()
    }

    pub fn progress_tracker(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Wait until every worker of the execution has exited
    pub async fn wait_for_completion(&self, id: &str) -> Result<()> {
        let execution = self.lookup(id)?;
        for joined in join_all(execution.take_workers()).await {
            if let Err(e) = joined {
                error!(execution_id = %id, error = %e, "worker task failed");
            }
        }
        Ok(())
    }

    /// Drop a pruned execution: stop its workers, then delete its series
    fn forget(&self, id: &str) {
        if let Some((_, execution)) = self.executions.remove(id) {
            execution.cancel();
        }
        let removed = self.collector.prune(id);
        info!(execution_id = %id, series = removed, "execution pruned");
    }

    /// Record metrics without resurrecting series of an execution pruned concurrently
    fn record_samples(&self, execution: &Execution, record: impl FnOnce()) {
        if execution.is_cancelled() {
            return;
        }
        record();
        if execution.is_cancelled() {
            self.collector.prune(execution.id());
        }
    }

    fn get(&self, id: &str) -> Option<Arc<Execution>> {
        self.executions.get(id).map(|e| Arc::clone(e.value()))
    }

    fn lookup(&self, id: &str) -> Result<Arc<Execution>> {
        self.get(id)
            .ok_or_else(|| ControllerError::execution_not_found(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingJob {
        id: String,
        node: String,
        created: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn id(&self) -> &str {
            &self.id
        }

        fn node(&self) -> &str {
            &self.node
        }

        async fn create_pod(&self) -> anyhow::Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(dir: &TempDir) -> Arc<ExecutionRegistry> {
        let config = Config::builder()
            .report_directory(dir.path())
            .pod_pool_size(2)
            .report_history(2)
            .build()
            .unwrap();
        ExecutionRegistry::from_config(config).unwrap()
    }

    #[test]
    fn test_id_collision_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let (first, _q1) = registry.register_execution(now);
        let (second, _q2) = registry.register_execution(now);
        std::fs::create_dir(dir.path().join("202401011200-002")).unwrap();
        let (third, _q3) = registry.register_execution(now);

        assert_eq!(first.id(), "202401011200");
        assert_eq!(second.id(), "202401011200-001");
        assert_eq!(third.id(), "202401011200-003");
        assert_eq!(
            registry.execution_ids(),
            vec!["202401011200", "202401011200-001", "202401011200-003"]
        );
    }

    #[test]
    fn test_many_collisions_keep_creation_order() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let mut created = Vec::new();
        let mut queues = Vec::new();
        for _ in 0..12 {
            let (execution, queue) = registry.register_execution(now);
            created.push(execution.id().to_string());
            queues.push(queue);
        }

        assert_eq!(created[10], "202401011200-010");
        assert_eq!(created[11], "202401011200-011");
        assert_eq!(registry.execution_ids(), created);
        assert_eq!(execution_id_value(&created[11]), 202401011200.0);
    }

    #[tokio::test]
    async fn test_duplicate_node_and_sealing() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let id = registry.new_execution(1);
        let created = Arc::new(AtomicUsize::new(0));
        let job = |node: &str| -> Arc<dyn Job> {
            Arc::new(CountingJob {
                id: id.clone(),
                node: node.to_string(),
                created: Arc::clone(&created),
            })
        };

        registry.add_pod(job("node-a")).await.unwrap();
        assert!(matches!(
            registry.add_pod(job("node-a")).await,
            Err(ControllerError::DuplicateNode { .. })
        ));

        registry.all_added(&id).unwrap();
        assert!(matches!(
            registry.all_added(&id),
            Err(ControllerError::AlreadySealed { .. })
        ));
        assert!(matches!(
            registry.add_pod(job("node-b")).await,
            Err(ControllerError::AlreadySealed { .. })
        ));
        assert!(!registry.has("node-b", &id));

        registry.pod_terminated(&id, "node-a", Phase::Succeeded).unwrap();
        registry.wait_for_completion(&id).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let err = registry
            .pod_terminated("190001010000", "node-a", Phase::Succeeded)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(registry.all_added("190001010000").unwrap_err().is_not_found());
        registry.report_received("190001010000", "node-a", None, &Results::new());
        assert!(!registry.has("node-a", "190001010000"));
    }

    #[tokio::test]
    async fn test_pruning_cancels_waiting_workers() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let id = registry.new_execution(1);
        let created = Arc::new(AtomicUsize::new(0));
        registry
            .add_pod(Arc::new(CountingJob {
                id: id.clone(),
                node: "node-a".to_string(),
                created: Arc::clone(&created),
            }))
            .await
            .unwrap();
        registry.all_added(&id).unwrap();

        let execution = registry.get(&id).unwrap();
        let workers = execution.take_workers();
        registry.forget(&id);

        assert!(execution.is_cancelled());
        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), join_all(workers))
            .await
            .unwrap();
        assert!(joined.iter().all(|r| r.is_ok()));
        assert!(registry.execution_ids().is_empty());
        assert!(registry.wait_for_completion(&id).await.unwrap_err().is_not_found());
    }
}
