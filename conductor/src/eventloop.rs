//! Three concurrent producers - orchestrator watch, registry pub/sub,
//! and a periodic full-sweep timer - feed one coalescing work queue
//! that a single worker drains.
//!
//! The original implementation ran these as one `threading.Thread`
//! whose target was the *return value* of a blocking call rather than
//! the callable itself, so only one of the three ever actually ran
//! concurrently with the others. Here each producer is its own spawned
//! task from the start.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::TrainerConfig;
use crate::naming::job_name;
use crate::orchestrator::{OrchestratorClient, WatchEvent};
use crate::reconcile::{execute, reconcile};
use crate::registry::RegistryClient;
use crate::sweep::{full_reconcile, ResourceCursor};

/// A bounded-in-spirit, coalescing queue of job ids: pushing an id
/// already pending is a no-op, so a burst of watch/pub-sub events for
/// the same job collapses into a single reconcile.
struct WorkQueue {
    order: Mutex<VecDeque<String>>,
    pending: Mutex<HashSet<String>>,
    notify: Notify,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            order: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, job_id: String) {
        let mut pending = self.pending.lock().await;
        if pending.insert(job_id.clone()) {
            self.order.lock().await.push_back(job_id);
            self.notify.notify_one();
        }
    }

    async fn pop(&self) -> String {
        loop {
            {
                let mut order = self.order.lock().await;
                if let Some(job_id) = order.pop_front() {
                    self.pending.lock().await.remove(&job_id);
                    return job_id;
                }
            }
            self.notify.notified().await;
        }
    }
}

async fn worker_loop(
    cfg: Arc<TrainerConfig>,
    orchestrator: Arc<dyn OrchestratorClient>,
    registry: Arc<dyn RegistryClient>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    loop {
        let job_id = tokio::select! {
            _ = cancel.cancelled() => return,
            job_id = queue.pop() => job_id,
        };

        let record = match registry.read_record(&job_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to read registry record");
                continue;
            }
        };
        let name = job_name(&job_id);
        let orch_job = match orchestrator.get_job(&name).await {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to read orchestrator job");
                continue;
            }
        };

        let action = reconcile(record.as_ref(), orch_job.as_ref());
        if action != crate::reconcile::Action::NoOp {
            tracing::debug!(job_id, action = action.label(), "reconciling");
        }
        if let Err(e) = execute(
            &job_id,
            record.as_ref(),
            action,
            &cfg,
            orchestrator.as_ref(),
            registry.as_ref(),
        )
        .await
        {
            tracing::warn!(job_id, error = %e, "reconcile execution failed");
        }
    }
}

async fn pubsub_producer(
    registry: Arc<dyn RegistryClient>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let listener = {
        let registry = registry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.start_listener(cancel, tx).await {
                tracing::error!(error = %e, "registry listener exited with error");
            }
        })
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job_id = rx.recv() => {
                match job_id {
                    Some(job_id) => queue.push(job_id).await,
                    None => break,
                }
            }
        }
    }
    listener.abort();
}

async fn watch_producer(
    orchestrator: Arc<dyn OrchestratorClient>,
    registry: Arc<dyn RegistryClient>,
    cfg: Arc<TrainerConfig>,
    queue: Arc<WorkQueue>,
    mut cursor: ResourceCursor,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let watch_task = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            let resource_version = cursor.0.clone();
            tokio::spawn(async move { orchestrator.watch_jobs(resource_version, cancel, tx).await })
        };

        let mut expired = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    watch_task.abort();
                    return;
                }
                event = rx.recv() => {
                    match event {
                        None => break,
                        Some(WatchEvent::Expired) => {
                            expired = true;
                            break;
                        }
                        Some(WatchEvent::Added(job) | WatchEvent::Modified(job) | WatchEvent::Deleted(job)) => {
                            if let Some(id) = job
                                .metadata
                                .labels
                                .as_ref()
                                .and_then(|l| l.get(crate::naming::JOB_ID_LABEL))
                            {
                                queue.push(id.clone()).await;
                            }
                        }
                    }
                }
            }
        }
        let _ = watch_task.await;

        if expired {
            tracing::info!("watch expired, running full sweep to resume");
        } else {
            tracing::warn!("watch stream ended, running full sweep before restart");
        }
        match full_reconcile(&cfg, orchestrator.as_ref(), registry.as_ref()).await {
            Ok(new_cursor) => cursor = new_cursor,
            Err(e) => {
                tracing::error!(error = %e, "full sweep after watch restart failed, retrying shortly");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn timer_producer(
    cfg: Arc<TrainerConfig>,
    orchestrator: Arc<dyn OrchestratorClient>,
    registry: Arc<dyn RegistryClient>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(cfg.reconcile_interval_secs));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                if let Err(e) = full_reconcile(&cfg, orchestrator.as_ref(), registry.as_ref()).await {
                    tracing::error!(error = %e, "periodic full sweep failed");
                }
            }
        }
    }
}

/// Runs the event loop until `cancel` fires. Performs one full sweep up
/// front (recovering from any drift since the process last ran and
/// establishing the watch's initial resourceVersion), then runs the
/// three producers and the worker concurrently.
pub async fn run(
    cfg: Arc<TrainerConfig>,
    orchestrator: Arc<dyn OrchestratorClient>,
    registry: Arc<dyn RegistryClient>,
    cancel: CancellationToken,
) {
    let cursor = match full_reconcile(&cfg, orchestrator.as_ref(), registry.as_ref()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "initial full sweep failed, watch will start from an empty cursor");
            ResourceCursor(String::new())
        }
    };

    let queue = Arc::new(WorkQueue::new());

    let worker = tokio::spawn(worker_loop(
        cfg.clone(),
        orchestrator.clone(),
        registry.clone(),
        queue.clone(),
        cancel.clone(),
    ));
    let pubsub = tokio::spawn(pubsub_producer(registry.clone(), queue.clone(), cancel.clone()));
    let watch = tokio::spawn(watch_producer(
        orchestrator.clone(),
        registry.clone(),
        cfg.clone(),
        queue.clone(),
        cursor,
        cancel.clone(),
    ));
    let timer = tokio::spawn(timer_producer(cfg, orchestrator, registry, cancel));

    let _ = tokio::join!(worker, pubsub, watch, timer);
}
