//! Dispatch queue and worker pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::InstanceId;
use domain::ReorderState;
use event_store::EventStore;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::coordinator::ReorderCoordinator;
use crate::error::SagaError;

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of workers pulling from the queue.
    pub worker_count: usize,

    /// Queued instances before `dispatch` waits for room.
    pub queue_capacity: usize,

    /// Times a run that ended without reaching a terminal state is queued
    /// again before the instance is finished as `Failed`.
    pub max_aborted_runs: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            max_aborted_runs: 5,
        }
    }
}

/// Instance IDs currently owned by a worker.
#[derive(Debug, Clone, Default)]
struct Claims {
    active: Arc<Mutex<HashSet<InstanceId>>>,
}

impl Claims {
    async fn try_claim(&self, instance_id: &InstanceId) -> bool {
        self.active.lock().await.insert(instance_id.clone())
    }

    async fn release(&self, instance_id: &InstanceId) {
        self.active.lock().await.remove(instance_id);
    }

    async fn contains(&self, instance_id: &InstanceId) -> bool {
        self.active.lock().await.contains(instance_id)
    }

    async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}

/// Consecutive aborted runs per instance.
#[derive(Debug, Clone, Default)]
struct AbortedRuns {
    counts: Arc<Mutex<HashMap<InstanceId, u32>>>,
}

impl AbortedRuns {
    async fn increment(&self, instance_id: &InstanceId) -> u32 {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(instance_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    async fn clear(&self, instance_id: &InstanceId) {
        self.counts.lock().await.remove(instance_id);
    }
}

/// State shared by every worker of one dispatcher.
struct WorkerShared<S: EventStore> {
    coordinator: Arc<ReorderCoordinator<S>>,
    receiver: Mutex<mpsc::Receiver<InstanceId>>,
    requeue: mpsc::Sender<InstanceId>,
    claims: Claims,
    aborted: AbortedRuns,
    max_aborted_runs: u32,
}

/// Hands instances to a fixed pool of workers.
///
/// Workers pull instance IDs from a shared queue. An instance already held
/// by a worker is never started a second time in this process; the
/// duplicate dispatch is dropped. A run that stops short of a terminal
/// state, for example because the event store rejected a write, is queued
/// again after a backoff delay taken from the coordinator's retry policy.
pub struct Dispatcher {
    sender: mpsc::Sender<InstanceId>,
    shutdown: watch::Sender<bool>,
    claims: Claims,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start<S>(coordinator: Arc<ReorderCoordinator<S>>, config: DispatcherConfig) -> Self
    where
        S: EventStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let claims = Claims::default();
        let shared = Arc::new(WorkerShared {
            coordinator,
            receiver: Mutex::new(receiver),
            requeue: sender.clone(),
            claims: claims.clone(),
            aborted: AbortedRuns::default(),
            max_aborted_runs: config.max_aborted_runs,
        });

        let workers = (0..config.worker_count.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&shared),
                    shutdown.subscribe(),
                ))
            })
            .collect();

        tracing::info!(workers = config.worker_count.max(1), "dispatcher started");

        Self {
            sender,
            shutdown,
            claims,
            workers: Mutex::new(workers),
        }
    }

    /// Queues an instance for execution.
    pub async fn dispatch(&self, instance_id: InstanceId) -> Result<(), SagaError> {
        if *self.shutdown.borrow() {
            return Err(SagaError::DispatcherClosed);
        }
        self.sender
            .send(instance_id)
            .await
            .map_err(|_| SagaError::DispatcherClosed)?;
        metrics::gauge!("reorder_dispatch_queue_depth")
            .set((self.sender.max_capacity() - self.sender.capacity()) as f64);
        Ok(())
    }

    /// Returns true if a worker is currently running the instance.
    pub async fn is_running(&self, instance_id: &InstanceId) -> bool {
        self.claims.contains(instance_id).await
    }

    /// Number of instances currently being executed.
    pub async fn active_count(&self) -> usize {
        self.claims.len().await
    }

    /// Stops accepting work and waits for running instances to finish their
    /// current run. Queued instances stay `Pending` and are picked up by
    /// recovery on the next start.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }
        tracing::info!("dispatcher stopped");
    }
}

async fn worker_loop<S>(
    worker: usize,
    shared: Arc<WorkerShared<S>>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: EventStore + 'static,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = async { shared.receiver.lock().await.recv().await } => next,
        };
        let Some(instance_id) = next else {
            break;
        };

        if !shared.claims.try_claim(&instance_id).await {
            tracing::debug!(worker, %instance_id, "instance already running, dropping dispatch");
            continue;
        }

        let result = shared.coordinator.run(&instance_id).await;
        shared.claims.release(&instance_id).await;

        match result {
            Ok(outcome) => {
                shared.aborted.clear(&instance_id).await;
                tracing::debug!(worker, %instance_id, state = %outcome.state, "instance run finished");
            }
            Err(SagaError::StepFailed { step, reason, .. }) => {
                shared.aborted.clear(&instance_id).await;
                tracing::error!(worker, %instance_id, step = %step, reason = %reason, "instance failed");
            }
            Err(SagaError::InstanceNotFound(_)) => {
                tracing::warn!(worker, %instance_id, "dispatched instance does not exist");
            }
            Err(e) => {
                metrics::counter!("reorder_runs_aborted_total").increment(1);
                let shutting_down = *shutdown.borrow();
                if shutting_down {
                    tracing::warn!(
                        worker,
                        %instance_id,
                        error = %e,
                        "instance run aborted during shutdown, left for recovery"
                    );
                } else {
                    handle_aborted_run(worker, &shared, instance_id, e).await;
                }
            }
        }
    }

    tracing::debug!(worker, "dispatch worker stopped");
}

/// Queues an aborted instance again after a backoff, or finishes it as
/// `Failed` once it has been aborted `max_aborted_runs` times in a row.
async fn handle_aborted_run<S>(
    worker: usize,
    shared: &WorkerShared<S>,
    instance_id: InstanceId,
    error: SagaError,
) where
    S: EventStore + 'static,
{
    let aborts = shared.aborted.increment(&instance_id).await;

    if aborts > shared.max_aborted_runs {
        shared.aborted.clear(&instance_id).await;
        tracing::error!(
            worker,
            %instance_id,
            aborts,
            error = %error,
            "instance run aborted too often, failing instance"
        );
        let reason = format!("run aborted {aborts} times: {error}");
        if let Err(e) = shared
            .coordinator
            .service()
            .finish(&instance_id, ReorderState::Failed, Some(reason))
            .await
        {
            tracing::error!(
                worker,
                %instance_id,
                error = %e,
                "failed to mark aborted instance as failed"
            );
        }
        return;
    }

    let delay = shared.coordinator.policy().delay_before_attempt(aborts + 1);
    tracing::warn!(
        worker,
        %instance_id,
        aborts,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        error = %error,
        "instance run aborted, queueing again"
    );

    let sleeper = Arc::clone(shared.coordinator.sleeper());
    let requeue = shared.requeue.clone();
    tokio::spawn(async move {
        sleeper.sleep(delay).await;
        if requeue.send(instance_id).await.is_err() {
            tracing::debug!("dispatch queue closed, aborted instance left for recovery");
        }
    });
}
