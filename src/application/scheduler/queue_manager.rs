use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::infrastructure::persistence::StateStore;

use super::task_service::TaskService;

/// Runs one worker per queue key so tasks sharing a key execute strictly
/// sequentially while distinct queues proceed in parallel.
///
/// Workers loop claim → execute → record. On shutdown the in-flight handler
/// gets the grace period to finish; past that its future is dropped and the
/// task stays `running` for the reaper to recover at next startup.
pub struct SequentialQueueManager {
    service: Arc<TaskService>,
    store: Arc<StateStore>,
    poll_interval: Duration,
    shutdown_grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl SequentialQueueManager {
    pub fn new(
        service: Arc<TaskService>,
        store: Arc<StateStore>,
        poll_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            service,
            store,
            poll_interval,
            shutdown_grace,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn workers for every registered task type plus any queue key with
    /// pending work left over from a previous run.
    pub async fn start(self: &Arc<Self>) {
        let mut keys: HashSet<String> = self
            .service
            .registered_types()
            .await
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect();
        match self.store.pending_queue_keys().await {
            Ok(pending) => keys.extend(pending),
            Err(e) => warn!("Could not enumerate pending queue keys: {e}"),
        }

        for key in keys {
            self.spawn_worker(key).await;
        }

        // Supervisor: pick up queue keys that appear later (custom keys on
        // submitted tasks).
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(manager.poll_interval * 4) => {
                        if let Ok(pending) = manager.store.pending_queue_keys().await {
                            for key in pending {
                                manager.ensure_worker(key).await;
                            }
                        }
                    }
                }
            }
        });
        self.workers
            .lock()
            .await
            .push(("queue-supervisor".to_string(), supervisor));

        info!("Sequential queue manager started");
    }

    async fn ensure_worker(self: &Arc<Self>, key: String) {
        let workers = self.workers.lock().await;
        if workers.iter().any(|(k, _)| k == &key) {
            return;
        }
        drop(workers);
        self.spawn_worker(key).await;
    }

    async fn spawn_worker(self: &Arc<Self>, queue_key: String) {
        let manager = Arc::clone(self);
        let key = queue_key.clone();
        let handle = tokio::spawn(async move {
            manager.worker_loop(&key).await;
        });
        self.workers.lock().await.push((queue_key, handle));
    }

    async fn worker_loop(&self, queue_key: &str) {
        debug!("Worker started for queue {}", queue_key);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.store.claim_next_task(queue_key).await {
                Ok(Some(task)) => {
                    let grace = self.shutdown_grace;
                    tokio::select! {
                        _ = self.service.execute(&task) => {}
                        _ = Self::shutdown_then_grace(&mut shutdown_rx, grace) => {
                            // Abandon the in-flight handler; the reaper will
                            // return the task to pending.
                            warn!(
                                task_id = %task.id,
                                "Shutdown grace expired, abandoning task on queue {}",
                                queue_key
                            );
                            break;
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(e) => {
                    error!("Worker for queue {} failed to claim: {e}", queue_key);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        debug!("Worker stopped for queue {}", queue_key);
    }

    /// Resolves once shutdown has been signalled AND the grace period has
    /// elapsed. Pending forever otherwise.
    async fn shutdown_then_grace(shutdown_rx: &mut watch::Receiver<bool>, grace: Duration) {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        tokio::time::sleep(grace).await;
    }

    /// Signal shutdown and wait for the workers, bounded by grace plus a
    /// small margin. Stragglers are aborted.
    pub async fn stop(&self) {
        info!("Stopping queue workers...");
        let _ = self.shutdown_tx.send(true);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let budget = self.shutdown_grace + Duration::from_secs(2);
        for (key, handle) in workers {
            let abort = handle.abort_handle();
            if tokio::time::timeout(budget, handle).await.is_err() {
                warn!("Worker {} did not stop in time, aborting", key);
                abort.abort();
            }
        }
        info!("Queue workers stopped");
    }
}
