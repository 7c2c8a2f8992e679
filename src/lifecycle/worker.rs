//! Bounded worker pool, one per execution.
//!
//! Workers share the execution's queue. Each one creates the pod for the next
//! job and then parks until the pod's termination signal arrives, so at most
//! `pod_pool_size` pods of an execution are in flight at any time.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::lifecycle::execution::{Execution, JobReceiver};
use crate::lifecycle::progress::ProgressTracker;
use crate::lifecycle::registry::ExecutionRegistry;
use crate::lifecycle::types::{Job, Phase};

/// Everything a worker needs besides the queue
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub registry: Weak<ExecutionRegistry>,
    pub execution: Arc<Execution>,
    pub progress: Arc<ProgressTracker>,
    pub completion_timeout: Option<Duration>,
}

enum Wait {
    Terminated,
    TimedOut,
    Cancelled,
}

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `size` workers draining `queue`
    pub(crate) fn start(ctx: WorkerContext, queue: JobReceiver, size: usize) -> Vec<JoinHandle<()>> {
        let queue = Arc::new(Mutex::new(queue));
        (0..size.max(1))
            .map(|worker| {
                let ctx = ctx.clone();
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { run_worker(worker, ctx, queue).await })
            })
            .collect()
    }
}

async fn run_worker(worker: usize, ctx: WorkerContext, queue: Arc<Mutex<JobReceiver>>) {
    let execution_id = ctx.execution.id().to_string();
    let mut cancelled = ctx.execution.cancelled();

    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                job = queue.recv() => job,
                _ = cancelled.wait_for(|c| *c) => None,
            }
        };
        let Some(job) = next else {
            break;
        };
        if ctx.execution.is_cancelled() {
            break;
        }
        if !process(&ctx, job, &mut cancelled).await {
            break;
        }
    }

    debug!(execution_id = %execution_id, worker, "worker finished");
}

/// Dispatch one job and wait for its pod to terminate. Returns false when the
/// execution was cancelled.
async fn process(ctx: &WorkerContext, job: Arc<dyn Job>, cancelled: &mut watch::Receiver<bool>) -> bool {
    let execution_id = ctx.execution.id();
    let node = job.node().to_string();

    let created = job.create_pod().await;
    ctx.execution.mark_dispatched(&node);
    ctx.progress.advance();

    if let Err(e) = created {
        error!(execution_id = %execution_id, node = %node, error = %e, "could not create pod");
        // a pod that was never created cannot deliver a termination signal
        terminate(ctx, &node, Phase::Failed);
    } else {
        debug!(execution_id = %execution_id, node = %node, "pod created");
    }

    let Some(mut state) = ctx.execution.subscribe(&node) else {
        warn!(execution_id = %execution_id, node = %node, "pod vanished from execution");
        return true;
    };

    let terminated = async { state.wait_for(|s| s.is_terminated()).await.is_ok() };
    let timeout = async {
        match ctx.completion_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        ok = terminated => if ok { Wait::Terminated } else { Wait::Cancelled },
        _ = cancelled.wait_for(|c| *c) => Wait::Cancelled,
        _ = timeout => Wait::TimedOut,
    };

    match outcome {
        Wait::Cancelled => {
            debug!(execution_id = %execution_id, node = %node, "execution cancelled while waiting");
            return false;
        }
        Wait::TimedOut => {
            warn!(
                execution_id = %execution_id,
                node = %node,
                timeout_secs = ctx.completion_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                "no termination signal in time"
            );
            terminate(ctx, &node, Phase::Unknown);
        }
        Wait::Terminated => {}
    }

    ctx.progress.advance();
    info!(
        execution_id = %execution_id,
        node = %node,
        progress = %ctx.progress.formatted(),
        "pod completed"
    );
    true
}

/// Feed a synthetic termination through the registry so metrics and progress stay consistent
fn terminate(ctx: &WorkerContext, node: &str, phase: Phase) {
    let execution_id = ctx.execution.id();
    match ctx.registry.upgrade() {
        Some(registry) => {
            if let Err(e) = registry.pod_terminated(execution_id, node, phase) {
                warn!(
                    execution_id = %execution_id,
                    node = %node,
                    category = e.category(),
                    error = %e,
                    "could not mark pod terminated"
                );
            }
        }
        None => {
            // registry dropped, only release the waiting worker
            if let Err(e) = ctx.execution.mark_terminated(node, phase) {
                debug!(
                    execution_id = %execution_id,
                    node = %node,
                    category = e.category(),
                    error = %e,
                    "could not mark pod terminated"
                );
            }
        }
    }
}
