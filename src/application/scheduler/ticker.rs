use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use crate::domain::market_hours::MarketHours;
use crate::infrastructure::persistence::StateStore;

use super::task_service::TaskService;

/// Periodic control plane: turns the `background_tasks_config` table into
/// task submissions.
///
/// Each tick walks the enabled specs and submits a task for every spec whose
/// frequency has elapsed since its last submission. The first tick after
/// start submits immediately (warm-up). Market-hours-only task types are
/// skipped silently outside the trading window.
pub struct PeriodicScheduler {
    service: Arc<TaskService>,
    store: Arc<StateStore>,
    tick_interval: Duration,
    /// Applied when a spec row carries no positive frequency.
    default_frequency_seconds: i64,
    market_hours: MarketHours,
    market_hours_only: bool,
    last_scheduled: Mutex<HashMap<String, DateTime<Utc>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl PeriodicScheduler {
    pub fn new(
        service: Arc<TaskService>,
        store: Arc<StateStore>,
        tick_interval: Duration,
        market_hours: MarketHours,
        market_hours_only: bool,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            service,
            store,
            tick_interval,
            default_frequency_seconds: 3600,
            market_hours,
            market_hours_only,
            last_scheduled: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    pub fn with_default_frequency(mut self, default_frequency_seconds: i64) -> Self {
        self.default_frequency_seconds = default_frequency_seconds.max(1);
        self
    }

    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "Periodic scheduler started (tick every {:?})",
            self.tick_interval
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.tick(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!("Periodic scheduler stopped");
    }

    /// One pass over the spec table. Public for tests.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let specs = match self.store.list_task_specs().await {
            Ok(specs) => specs,
            Err(e) => {
                error!("Could not load background task config: {e}");
                return;
            }
        };

        for spec in specs.into_iter().filter(|s| s.enabled) {
            let key = spec.task_name.as_str().to_string();

            let frequency = if spec.frequency_seconds > 0 {
                spec.frequency_seconds
            } else {
                self.default_frequency_seconds
            };
            let due = {
                let last = self.last_scheduled.lock().await;
                match last.get(&key) {
                    // Warm-up: never scheduled in this process, submit now.
                    None => true,
                    Some(last_at) => (now - *last_at).num_seconds() >= frequency,
                }
            };
            if !due {
                continue;
            }

            if self.market_hours_only
                && spec.task_name.market_hours_only()
                && !self.market_hours.is_open_at(now)
            {
                // Outside the window nothing is submitted and nothing is
                // recorded, so the task fires on the first in-window tick.
                debug!("Market closed, skipping {}", spec.task_name);
                continue;
            }

            match self
                .service
                .submit(spec.task_name, json!({}), Some(spec.priority), None, None)
                .await
            {
                Ok(task_id) => {
                    debug!("Scheduled {} as task {}", spec.task_name, task_id);
                    self.last_scheduled.lock().await.insert(key, now);
                }
                Err(e) => error!("Failed to submit scheduled {}: {e}", spec.task_name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduler::execution_tracker::ExecutionTracker;
    use crate::application::scheduler::task_service::ExecutionPolicy;
    use crate::domain::task::{TaskSpec, TaskType};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::persistence::Database;
    use chrono::TimeZone;

    async fn setup() -> (Arc<StateStore>, Arc<TaskService>) {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let tracker = Arc::new(ExecutionTracker::new(store.clone(), 100));
        let service = Arc::new(TaskService::new(
            store.clone(),
            EventBus::new(),
            tracker,
            ExecutionPolicy::default(),
        ));
        (store, service)
    }

    fn scheduler(
        service: Arc<TaskService>,
        store: Arc<StateStore>,
        market_hours_only: bool,
    ) -> PeriodicScheduler {
        PeriodicScheduler::new(
            service,
            store,
            Duration::from_millis(50),
            MarketHours::default(),
            market_hours_only,
        )
    }

    // Wednesday midday IST: market open.
    fn open_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 2, 6, 30, 0).unwrap()
    }

    // Saturday: market closed.
    fn closed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 5, 6, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_warmup_tick_submits_immediately() {
        let (store, service) = setup().await;
        store
            .seed_task_specs(&[TaskSpec::new(TaskType::HealthCheck, 3600, 1)])
            .await
            .unwrap();

        let scheduler = scheduler(service, store.clone(), false);
        scheduler.tick(open_instant()).await;

        assert_eq!(store.count_tasks_by_status("pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_due_until_frequency_elapses() {
        let (store, service) = setup().await;
        store
            .seed_task_specs(&[TaskSpec::new(TaskType::HealthCheck, 60, 1)])
            .await
            .unwrap();

        let scheduler = scheduler(service, store.clone(), false);
        let t0 = open_instant();
        scheduler.tick(t0).await;
        scheduler.tick(t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(store.count_tasks_by_status("pending").await.unwrap(), 1);

        scheduler.tick(t0 + chrono::Duration::seconds(61)).await;
        assert_eq!(store.count_tasks_by_status("pending").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disabled_specs_never_fire() {
        let (store, service) = setup().await;
        let mut spec = TaskSpec::new(TaskType::HealthCheck, 60, 1);
        spec.enabled = false;
        store.seed_task_specs(&[spec]).await.unwrap();

        let scheduler = scheduler(service, store.clone(), false);
        scheduler.tick(open_instant()).await;
        assert_eq!(store.count_tasks_by_status("pending").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_market_hours_gate_skips_silently() {
        let (store, service) = setup().await;
        store
            .seed_task_specs(&[
                // Gated type.
                TaskSpec::new(TaskType::NewsMonitoring, 60, 5),
                // Ungated type fires regardless.
                TaskSpec::new(TaskType::HealthCheck, 60, 1),
            ])
            .await
            .unwrap();

        let scheduler = scheduler(service, store.clone(), true);
        scheduler.tick(closed_instant()).await;

        let pending = store.list_tasks_by_status("pending", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_type, TaskType::HealthCheck);

        // Once the market opens (Monday) the gated task fires on the next
        // tick, and health_check is due again.
        let monday = Utc.with_ymd_and_hms(2025, 7, 7, 6, 30, 0).unwrap();
        scheduler.tick(monday).await;
        let pending = store.list_tasks_by_status("pending", 10).await.unwrap();
        assert_eq!(pending.len(), 3);
    }
}
