use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info};

use crate::application::resource_manager::ResourceManager;

/// Budget for each shutdown callback.
const SHUTDOWN_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub type AnyService = Arc<dyn Any + Send + Sync>;
pub type ShutdownFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type Factory = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<AnyService>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service not registered: {name}")]
    NotRegistered { name: String },

    #[error("service {name} has a different type than requested")]
    TypeMismatch { name: String },

    #[error("factory for {name} failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

struct Entry {
    factory: Factory,
    cell: OnceCell<AnyService>,
}

/// Lazy-singleton service registry.
///
/// Each name maps to an async factory that runs at most once; the first
/// `get` constructs the instance under the entry's own cell, concurrent
/// getters wait for it, and later getters receive the cached `Arc`. A
/// factory error leaves the cell empty so a later `get` can retry.
pub struct ServiceContainer {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
    shutdown_callbacks: Mutex<Vec<(String, ShutdownFn)>>,
    resources: Arc<ResourceManager>,
}

impl ServiceContainer {
    pub fn new(resources: Arc<ResourceManager>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            shutdown_callbacks: Mutex::new(Vec::new()),
            resources,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Register a lazy singleton. Registering the same name again replaces
    /// the factory and drops any previously cached instance.
    pub async fn register_singleton<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<AnyService>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering singleton: {}", name);
        self.entries.write().await.insert(
            name,
            Arc::new(Entry {
                factory: Box::new(factory),
                cell: OnceCell::new(),
            }),
        );
    }

    /// Resolve a singleton, constructing it on first use.
    pub async fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        let entry = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .cloned()
                .ok_or_else(|| ContainerError::NotRegistered {
                    name: name.to_string(),
                })?
        };

        let service = entry
            .cell
            .get_or_try_init(|| (entry.factory)())
            .await
            .map_err(|e| ContainerError::Factory {
                name: name.to_string(),
                source: e,
            })?
            .clone();

        service
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Register a callback to run at shutdown. Callbacks run in reverse
    /// registration order, each under a bounded timeout.
    pub async fn register_shutdown(&self, name: impl Into<String>, callback: ShutdownFn) {
        self.shutdown_callbacks
            .lock()
            .await
            .push((name.into(), callback));
    }

    /// Orderly teardown: shutdown callbacks in reverse registration order,
    /// then resource cleanup (background tasks, handles).
    pub async fn shutdown(&self) {
        info!("Container shutdown starting");
        let callbacks = std::mem::take(&mut *self.shutdown_callbacks.lock().await);
        for (name, callback) in callbacks.into_iter().rev() {
            match tokio::time::timeout(SHUTDOWN_CALLBACK_TIMEOUT, callback()).await {
                Ok(()) => debug!("Shutdown callback completed: {}", name),
                Err(_) => error!("Shutdown callback timed out: {}", name),
            }
        }
        self.resources.cleanup().await;
        info!("Container shutdown complete");
    }
}
