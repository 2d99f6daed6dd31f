use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::events::{Event, EventType};

/// Handler invoked for every published event of a subscribed type.
///
/// Handlers run on the publisher's flow of control; anything long-running
/// should submit a task instead of blocking the publish.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Token returned by `subscribe`, used to remove the registration again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    event_type: EventType,
    id: u64,
}

type HandlerEntry = (u64, Arc<dyn EventHandler>);

/// In-process typed pub/sub bus.
///
/// Handlers for one event type are invoked in registration order. A failing
/// handler is logged and never prevents the remaining handlers from running.
/// Publishing takes a snapshot of the subscriber list, so handlers may
/// subscribe/unsubscribe without deadlocking the bus.
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<EventType, Vec<HandlerEntry>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a handler for one event type.
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push((id, handler));
        SubscriptionHandle { event_type, id }
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut handlers = self.handlers.write().await;
        if let Some(entries) = handlers.get_mut(&handle.event_type) {
            entries.retain(|(id, _)| *id != handle.id);
        }
    }

    /// Publish an event to every handler registered for its type, in
    /// registration order. Synchronous from the publisher's perspective.
    pub async fn publish(&self, event: Event) {
        let snapshot: Vec<HandlerEntry> = {
            let handlers = self.handlers.read().await;
            match handlers.get(&event.event_type) {
                Some(entries) => entries.clone(),
                None => return,
            }
        };

        for (id, handler) in snapshot {
            if let Err(e) = handler.handle(&event).await {
                warn!(
                    event_type = ?event.event_type,
                    subscription = id,
                    "Event handler failed: {e:#}"
                );
            }
        }
    }

    /// Get count of subscribers for one type (for testing)
    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .await
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingHandler {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.label);
            if self.fail {
                anyhow::bail!("handler {} failed", self.label);
            }
            Ok(())
        }
    }

    fn event() -> Event {
        Event::new(EventType::NewsFetched, "test", json!({}))
    }

    #[tokio::test]
    async fn test_handlers_invoked_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventType::NewsFetched,
            Arc::new(RecordingHandler {
                label: "h1",
                log: Arc::clone(&log),
                fail: false,
            }),
        )
        .await;
        bus.subscribe(
            EventType::NewsFetched,
            Arc::new(RecordingHandler {
                label: "h2",
                log: Arc::clone(&log),
                fail: false,
            }),
        )
        .await;

        bus.publish(event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_rest() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventType::NewsFetched,
            Arc::new(RecordingHandler {
                label: "h1",
                log: Arc::clone(&log),
                fail: true,
            }),
        )
        .await;
        bus.subscribe(
            EventType::NewsFetched,
            Arc::new(RecordingHandler {
                label: "h2",
                log: Arc::clone(&log),
                fail: false,
            }),
        )
        .await;

        bus.publish(event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(event()).await;
        assert_eq!(bus.subscriber_count(EventType::NewsFetched).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handler() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = bus
            .subscribe(
                EventType::NewsFetched,
                Arc::new(RecordingHandler {
                    label: "h1",
                    log: Arc::clone(&log),
                    fail: false,
                }),
            )
            .await;
        assert_eq!(bus.subscriber_count(EventType::NewsFetched).await, 1);

        bus.unsubscribe(&handle).await;
        assert_eq!(bus.subscriber_count(EventType::NewsFetched).await, 0);

        bus.publish(event()).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_type_routing() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            EventType::TaskCompleted,
            Arc::new(RecordingHandler {
                label: "tasks",
                log: Arc::clone(&log),
                fail: false,
            }),
        )
        .await;

        // Published type has no subscribers; the TaskCompleted handler must
        // not see it.
        bus.publish(event()).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clone_shares_subscriptions() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus1.subscribe(
            EventType::NewsFetched,
            Arc::new(RecordingHandler {
                label: "h1",
                log: Arc::clone(&log),
                fail: false,
            }),
        )
        .await;

        assert_eq!(bus2.subscriber_count(EventType::NewsFetched).await, 1);
    }
}
