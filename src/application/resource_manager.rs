use futures::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Join budget applied to every tracked task and cleanup callback.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub tasks: usize,
    pub cleanup_callbacks: usize,
}

struct Inner {
    tasks: Vec<(String, JoinHandle<()>)>,
    cleanups: Vec<(String, CleanupFn)>,
    shutdown: bool,
}

/// Centralized lifecycle tracking for background tasks and teardown hooks.
///
/// Background loops register their join handles here; subsystems register
/// cleanup callbacks. `cleanup` runs the callbacks, then joins every task
/// under a bounded budget and aborts whatever is left.
pub struct ResourceManager {
    inner: Mutex<Inner>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: Vec::new(),
                cleanups: Vec::new(),
                shutdown: false,
            }),
        }
    }

    pub async fn register_task(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        debug!("Registered task: {}", name);
        self.inner.lock().await.tasks.push((name, handle));
    }

    pub async fn register_cleanup<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let name = name.into();
        debug!("Registered cleanup callback: {}", name);
        self.inner
            .lock()
            .await
            .cleanups
            .push((name, Box::new(callback)));
    }

    pub async fn stats(&self) -> ResourceStats {
        let inner = self.inner.lock().await;
        ResourceStats {
            tasks: inner.tasks.len(),
            cleanup_callbacks: inner.cleanups.len(),
        }
    }

    /// Release everything: cleanup callbacks first (newest first), then the
    /// tracked tasks. Idempotent; the second call is a no-op.
    pub async fn cleanup(&self) {
        let (cleanups, tasks) = {
            let mut inner = self.inner.lock().await;
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            (
                std::mem::take(&mut inner.cleanups),
                std::mem::take(&mut inner.tasks),
            )
        };

        info!("ResourceManager: Starting cleanup");

        for (name, callback) in cleanups.into_iter().rev() {
            match tokio::time::timeout(CLEANUP_TIMEOUT, callback()).await {
                Ok(()) => debug!("Cleanup callback completed: {}", name),
                Err(_) => error!("Cleanup callback timed out: {}", name),
            }
        }

        for (name, handle) in tasks {
            if handle.is_finished() {
                continue;
            }
            let abort = handle.abort_handle();
            match tokio::time::timeout(CLEANUP_TIMEOUT, handle).await {
                Ok(_) => debug!("Task finished: {}", name),
                Err(_) => {
                    warn!("Task {} did not stop within {:?}, aborting", name, CLEANUP_TIMEOUT);
                    abort.abort();
                }
            }
        }

        info!("ResourceManager: Cleanup complete");
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_runs_callbacks_in_reverse_order() {
        let manager = ResourceManager::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            manager
                .register_cleanup(label, move || {
                    Box::pin(async move {
                        order.lock().unwrap().push(label);
                    })
                })
                .await;
        }

        manager.cleanup().await;
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_cleanup_joins_cooperative_tasks() {
        let manager = ResourceManager::new();
        let done = Arc::new(AtomicUsize::new(0));

        let d = Arc::clone(&done);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            d.fetch_add(1, Ordering::SeqCst);
        });
        manager.register_task("worker", handle).await;

        manager.cleanup().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let manager = ResourceManager::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        manager
            .register_cleanup("once", move || {
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        manager.cleanup().await;
        manager.cleanup().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
