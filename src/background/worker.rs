//! Off-main-context clustering.
//!
//! Workers only ever see a [`ClusterJob`] and hand back a [`ClusterPlan`];
//! pools stay on the dispatching side. The dispatcher keeps small passes
//! inline, sends large ones to its worker under a deadline, and recomputes
//! inline from the same job when the worker fails or misses the deadline.

use crate::background::job::ClusterJob;
use crate::core::config::WorkerConfig;
use crate::spatial::clustering::{ClusterPlan, SpatialClusterEngine};
use crate::traits::ClusterWorker;
use crate::{FleetError, Result};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

struct WorkItem {
    job: ClusterJob,
    reply: oneshot::Sender<ClusterPlan>,
}

/// Pool of dedicated OS threads fed through a crossbeam queue
pub struct ThreadClusterWorker {
    sender: Option<Sender<WorkItem>>,
    handles: Vec<JoinHandle<()>>,
    abandoned: Arc<AtomicU64>,
}

impl ThreadClusterWorker {
    pub fn new(threads: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<WorkItem>();
        let abandoned = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let abandoned = abandoned.clone();
            let handle = std::thread::Builder::new()
                .name(format!("fleetmap-cluster-{}", index))
                .spawn(move || Self::worker_loop(receiver, abandoned))?;
            handles.push(handle);
        }
        log::debug!("started {} clustering threads", handles.len());
        Ok(Self {
            sender: Some(sender),
            handles,
            abandoned,
        })
    }

    fn worker_loop(receiver: Receiver<WorkItem>, abandoned: Arc<AtomicU64>) {
        // Exits once every sender is gone
        while let Ok(item) = receiver.recv() {
            if item.reply.is_closed() {
                abandoned.fetch_add(1, Ordering::Relaxed);
                log::trace!("skipping pass {}, its caller already gave up", item.job.pass);
                continue;
            }
            let plan = SpatialClusterEngine::plan(&item.job);
            if item.reply.send(plan).is_err() {
                log::trace!("pass {} finished after its caller gave up", item.job.pass);
            }
        }
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Jobs dropped unplanned because the caller stopped waiting
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Jobs waiting for a free thread
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(Sender::len).unwrap_or(0)
    }
}

#[async_trait]
impl ClusterWorker for ThreadClusterWorker {
    async fn compute(&self, job: ClusterJob) -> Result<ClusterPlan> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| FleetError::Worker("worker is shut down".into()))?;
        let (reply, response) = oneshot::channel();
        sender
            .send(WorkItem { job, reply })
            .map_err(|_| FleetError::Worker("clustering queue is closed".into()))?;
        response
            .await
            .map_err(|_| FleetError::Worker("clustering thread dropped the job".into()))
    }

    fn name(&self) -> &str {
        "thread"
    }
}

impl Drop for ThreadClusterWorker {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::warn!("clustering thread panicked");
            }
        }
    }
}

/// Runs each job on tokio's blocking pool
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingClusterWorker;

#[async_trait]
impl ClusterWorker for BlockingClusterWorker {
    async fn compute(&self, job: ClusterJob) -> Result<ClusterPlan> {
        tokio::task::spawn_blocking(move || SpatialClusterEngine::plan(&job))
            .await
            .map_err(|e| FleetError::Worker(format!("blocking task failed: {}", e)))
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    pub inline: u64,
    pub offloaded: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl DispatchStats {
    pub fn fallbacks(&self) -> u64 {
        self.timeouts + self.failures
    }
}

/// Chooses between inline and worker execution for each pass
pub struct ClusterDispatcher {
    worker: Option<Arc<dyn ClusterWorker>>,
    config: WorkerConfig,
    stats: DispatchStats,
}

impl ClusterDispatcher {
    pub fn new(config: WorkerConfig, worker: Option<Arc<dyn ClusterWorker>>) -> Self {
        Self {
            worker,
            config,
            stats: DispatchStats::default(),
        }
    }

    /// Dispatcher that always clusters on the calling context
    pub fn inline_only(config: WorkerConfig) -> Self {
        Self::new(config, None)
    }

    pub fn set_worker(&mut self, worker: Option<Arc<dyn ClusterWorker>>) {
        self.worker = worker;
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Plan a pass. Never fails: worker trouble degrades to inline work.
    pub async fn run(&mut self, job: ClusterJob) -> ClusterPlan {
        let worker = match &self.worker {
            Some(worker) if job.visible_count() > self.config.inline_threshold => worker.clone(),
            _ => {
                self.stats.inline += 1;
                return SpatialClusterEngine::plan(&job);
            }
        };

        self.stats.offloaded += 1;
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, worker.compute(job.clone())).await {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                self.stats.failures += 1;
                log::warn!(
                    "{} worker failed on pass {} ({}), clustering inline",
                    worker.name(),
                    job.pass,
                    e
                );
                SpatialClusterEngine::plan(&job)
            }
            Err(_) => {
                self.stats.timeouts += 1;
                log::warn!(
                    "{} worker missed the {:?} deadline on pass {}, clustering inline",
                    worker.name(),
                    timeout,
                    job.pass
                );
                SpatialClusterEngine::plan(&job)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.clone()
    }
}
