//! State of one fan-out cycle.
//!
//! An `Execution` owns the queue feeding its worker pool and one tracked pod
//! per node. Every pod carries a `watch` channel publishing its `PodState`, so
//! workers wake as soon as the termination signal lands instead of polling.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::errors::{ControllerError, Result};
use crate::lifecycle::types::{Job, Phase, PodRecord, PodState, STATUS_REPORT_RECEIVED, STATUS_STARTED};

pub(crate) type JobSender = mpsc::Sender<Arc<dyn Job>>;
pub(crate) type JobReceiver = mpsc::Receiver<Arc<dyn Job>>;

struct TrackedPod {
    record: PodRecord,
    signal: watch::Sender<PodState>,
}

impl TrackedPod {
    fn transition(&mut self, next: PodState) {
        self.record.state = next;
        self.signal.send_replace(next);
    }
}

pub struct Execution {
    id: String,
    pods: DashMap<String, TrackedPod>,
    sender: Mutex<Option<JobSender>>,
    cancel: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Execution {
    /// New execution whose queue holds at most `capacity` jobs
    pub(crate) fn new(id: impl Into<String>, capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (cancel, _) = watch::channel(false);
        let execution = Self {
            id: id.into(),
            pods: DashMap::new(),
            sender: Mutex::new(Some(tx)),
            cancel,
            workers: Mutex::new(Vec::new()),
        };
        (execution, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a node; each node may be added once per execution
    pub(crate) fn insert_pod(&self, node: &str) -> Result<()> {
        match self.pods.entry(node.to_string()) {
            Entry::Occupied(_) => Err(ControllerError::DuplicateNode {
                execution_id: self.id.clone(),
                node: node.to_string(),
            }),
            Entry::Vacant(slot) => {
                let (signal, _) = watch::channel(PodState::Pending);
                slot.insert(TrackedPod {
                    record: PodRecord::new(node),
                    signal,
                });
                Ok(())
            }
        }
    }

    /// Queue handle, `None` once sealed
    pub(crate) fn sender(&self) -> Option<JobSender> {
        self.sender.lock().clone()
    }

    /// Close the queue. Returns false if it was already closed.
    pub(crate) fn seal(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_sealed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Worker created the pod. A termination that raced ahead keeps its status.
    pub(crate) fn mark_dispatched(&self, node: &str) {
        if let Some(mut pod) = self.pods.get_mut(node) {
            if pod.record.started.is_none() {
                pod.record.started = Some(Utc::now());
            }
            if pod.record.state == PodState::Pending {
                pod.record.status = STATUS_STARTED.to_string();
            }
            let next = pod.record.state.on_dispatch();
            pod.transition(next);
        }
    }

    /// Record the termination signal. `Ok(None)` means it was already recorded.
    pub(crate) fn mark_terminated(&self, node: &str, phase: Phase) -> Result<Option<PodRecord>> {
        let mut pod = self
            .pods
            .get_mut(node)
            .ok_or_else(|| ControllerError::node_not_registered(&self.id, node))?;
        if pod.record.terminated.is_some() {
            return Ok(None);
        }

        let now = Utc::now();
        // keeps started <= terminated when the termination beats the dispatch marker
        if pod.record.started.is_none() {
            pod.record.started = Some(now);
        }
        pod.record.terminated = Some(now);
        pod.record.status = phase.as_str().to_string();
        pod.record.phase = Some(phase);
        let next = pod.record.state.on_terminated();
        pod.transition(next);
        Ok(Some(pod.record.clone()))
    }

    /// Record the report callback, `None` if the node is unknown
    pub(crate) fn mark_report(&self, node: &str, processing_error: bool) -> Option<PodRecord> {
        let mut pod = self.pods.get_mut(node)?;
        pod.record.report_received = Some(Utc::now());
        pod.record.status = STATUS_REPORT_RECEIVED.to_string();
        pod.record.report_error = processing_error;
        let next = pod.record.state.on_report();
        pod.transition(next);
        Some(pod.record.clone())
    }

    pub(crate) fn subscribe(&self, node: &str) -> Option<watch::Receiver<PodState>> {
        self.pods.get(node).map(|pod| pod.signal.subscribe())
    }

    pub fn record(&self, node: &str) -> Option<PodRecord> {
        self.pods.get(node).map(|pod| pod.record.clone())
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.pods.contains_key(node)
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// Stop every worker still waiting on this execution
    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub(crate) fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    pub(crate) fn attach_workers(&self, handles: Vec<JoinHandle<()>>) {
        self.workers.lock().extend(handles);
    }

    pub(crate) fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock())
    }
}
