use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::application::container::{AnyService, ServiceContainer};
use crate::application::handlers::{
    EarningsCheckHandler, FundamentalsUpdateHandler, HealthCheckHandler, NewsMonitoringHandler,
    PortfolioSyncHandler, RecommendationGenerationHandler, RiskValidationHandler,
};
use crate::application::resource_manager::ResourceManager;
use crate::application::scheduler::{
    BackupScheduler, ExecutionPolicy, ExecutionTracker, PeriodicScheduler,
    SequentialQueueManager, TaskService,
};
use crate::config::Config;
use crate::domain::task::{TaskSpec, TaskType};
use crate::infrastructure::api::ProviderClient;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::{BackupManager, Database, StateStore};

/// Default periodic schedule, seeded once; operator edits in the config
/// table win over these on subsequent startups.
fn default_task_specs() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new(TaskType::NewsMonitoring, 300, 5),
        TaskSpec::new(TaskType::EarningsCheck, 900, 5),
        TaskSpec::new(TaskType::FundamentalsUpdate, 14_400, 3),
        TaskSpec::new(TaskType::RecommendationGeneration, 3600, 5),
        TaskSpec::new(TaskType::PortfolioSync, 3600, 7),
        TaskSpec::new(TaskType::RiskValidation, 300, 8),
        TaskSpec::new(TaskType::HealthCheck, 300, 1),
    ]
}

/// The assembled backend: container-wired services plus the background
/// loops that drive them.
pub struct Application {
    pub config: Config,
    pub container: Arc<ServiceContainer>,
    pub bus: EventBus,
    pub store: Arc<StateStore>,
    pub client: Arc<ProviderClient>,
    pub task_service: Arc<TaskService>,
    pub tracker: Arc<ExecutionTracker>,
    pub backup_manager: Option<Arc<BackupManager>>,
    queue_manager: Arc<SequentialQueueManager>,
    ticker: Arc<PeriodicScheduler>,
    backup_scheduler: Option<Arc<BackupScheduler>>,
    reaper_stop: watch::Sender<bool>,
}

impl Application {
    /// Construct the full dependency graph. Fatal errors here (bad config,
    /// unreachable database) abort startup.
    pub async fn build(config: Config) -> Result<Self> {
        info!(
            "Building marketmind application (environment: {:?})...",
            config.environment
        );

        let resources = Arc::new(ResourceManager::new());
        let container = Arc::new(ServiceContainer::new(resources));

        // 1. Database first; everything durable hangs off it.
        let db = Database::new(&config.database_url)
            .await
            .context("Failed to initialize database")?;

        // 2. Core singletons, resolved through the container in dependency
        //    order.
        container
            .register_singleton("event_bus", || {
                async { Ok(Arc::new(EventBus::new()) as AnyService) }.boxed()
            })
            .await;
        let bus = (*container.get::<EventBus>("event_bus").await?).clone();

        {
            let db = db.clone();
            container
                .register_singleton("state_store", move || {
                    let db = db.clone();
                    async move {
                        Ok(Arc::new(StateStore::new(&db, Duration::from_secs(10))) as AnyService)
                    }
                    .boxed()
                })
                .await;
        }
        let store = container.get::<StateStore>("state_store").await?;

        {
            let api = config.api.clone();
            let bus = bus.clone();
            container
                .register_singleton("provider_client", move || {
                    let api = api.clone();
                    let bus = bus.clone();
                    async move { Ok(Arc::new(ProviderClient::new(&api, bus)) as AnyService) }
                        .boxed()
                })
                .await;
        }
        let client = container.get::<ProviderClient>("provider_client").await?;

        {
            let store = store.clone();
            let max_history = config.scheduler.max_history;
            container
                .register_singleton("execution_tracker", move || {
                    let store = store.clone();
                    async move {
                        Ok(Arc::new(ExecutionTracker::new(store, max_history)) as AnyService)
                    }
                    .boxed()
                })
                .await;
        }
        let tracker = container.get::<ExecutionTracker>("execution_tracker").await?;

        {
            let store = store.clone();
            let bus = bus.clone();
            let tracker = tracker.clone();
            let policy = ExecutionPolicy {
                handler_timeout: Duration::from_secs(config.scheduler.handler_timeout_seconds),
                retry_base: Duration::from_secs(config.scheduler.retry_base_delay_seconds.max(1)),
                retry_cap: Duration::from_secs(config.scheduler.retry_max_delay_seconds.max(1)),
                default_max_attempts: config.scheduler.retry_attempts.max(1),
            };
            container
                .register_singleton("task_service", move || {
                    let store = store.clone();
                    let bus = bus.clone();
                    let tracker = tracker.clone();
                    let policy = policy.clone();
                    async move {
                        Ok(Arc::new(TaskService::new(store, bus, tracker, policy)) as AnyService)
                    }
                    .boxed()
                })
                .await;
        }
        let task_service = container.get::<TaskService>("task_service").await?;

        // 3. Domain handlers.
        task_service
            .register_handler(
                TaskType::NewsMonitoring,
                Arc::new(NewsMonitoringHandler::new(
                    store.clone(),
                    client.clone(),
                    bus.clone(),
                )),
            )
            .await;
        task_service
            .register_handler(
                TaskType::EarningsCheck,
                Arc::new(EarningsCheckHandler::new(
                    store.clone(),
                    client.clone(),
                    bus.clone(),
                )),
            )
            .await;
        task_service
            .register_handler(
                TaskType::FundamentalsUpdate,
                Arc::new(FundamentalsUpdateHandler::new(
                    store.clone(),
                    client.clone(),
                    bus.clone(),
                )),
            )
            .await;
        task_service
            .register_handler(
                TaskType::RecommendationGeneration,
                Arc::new(RecommendationGenerationHandler::new(
                    store.clone(),
                    bus.clone(),
                )),
            )
            .await;
        task_service
            .register_handler(
                TaskType::PortfolioSync,
                Arc::new(PortfolioSyncHandler::new(store.clone(), bus.clone())),
            )
            .await;
        task_service
            .register_handler(
                TaskType::RiskValidation,
                Arc::new(RiskValidationHandler::new(
                    store.clone(),
                    config.risk.clone(),
                )),
            )
            .await;
        task_service
            .register_handler(
                TaskType::HealthCheck,
                Arc::new(HealthCheckHandler::new(store.clone(), client.clone())),
            )
            .await;

        // 4. Seed the periodic schedule and recover tasks stranded by a
        //    previous run.
        store
            .seed_task_specs(&default_task_specs())
            .await
            .context("Failed to seed background task config")?;

        let stale_bound =
            Utc::now() - ChronoDuration::seconds(config.scheduler.max_run_time_seconds);
        match store.reap_stale_tasks(stale_bound).await {
            Ok(0) => {}
            Ok(n) => warn!("Reaped {} stale running tasks from previous run", n),
            Err(e) => warn!("Startup reap failed: {e}"),
        }

        // 5. Control plane.
        let queue_manager = Arc::new(SequentialQueueManager::new(
            task_service.clone(),
            store.clone(),
            Duration::from_millis(config.scheduler.worker_poll_ms),
            Duration::from_secs(config.scheduler.shutdown_grace_seconds),
        ));
        let ticker = Arc::new(
            PeriodicScheduler::new(
                task_service.clone(),
                store.clone(),
                Duration::from_secs(config.scheduler.tick_interval_seconds),
                config.scheduler.market_hours,
                config.scheduler.market_hours_only,
            )
            .with_default_frequency(config.scheduler.default_frequency_seconds),
        );

        // 6. Backups need a file-backed database.
        let (backup_manager, backup_scheduler) = match (config.backup.enabled, db.file_path()) {
            (true, Some(db_path)) => {
                let manager = Arc::new(BackupManager::new(
                    db_path.to_path_buf(),
                    config.backup.backup_dir.clone(),
                    config.backup.max_backups,
                ));
                let interval =
                    Duration::from_secs_f64(config.backup.interval_hours * 3600.0);
                let scheduler = Arc::new(BackupScheduler::new(
                    manager.clone(),
                    bus.clone(),
                    interval,
                ));
                (Some(manager), Some(scheduler))
            }
            (true, None) => {
                warn!("Backups enabled but the database is not file-backed; disabling");
                (None, None)
            }
            (false, _) => {
                info!("Database backups disabled in configuration");
                (None, None)
            }
        };

        let (reaper_stop, _) = watch::channel(false);

        Ok(Self {
            config,
            container,
            bus,
            store,
            client,
            task_service,
            tracker,
            backup_manager,
            queue_manager,
            ticker,
            backup_scheduler,
            reaper_stop,
        })
    }

    /// Start the background loops: queue workers, periodic ticker, reaper,
    /// and the backup scheduler.
    pub async fn start(&self) -> Result<()> {
        info!("Starting background services...");
        let resources = self.container.resources().clone();

        self.queue_manager.start().await;

        {
            let ticker = self.ticker.clone();
            let stop = ticker.stop_handle();
            let handle = tokio::spawn(ticker.run());
            resources.register_task("periodic-scheduler", handle).await;
            self.container
                .register_shutdown(
                    "periodic_scheduler",
                    Box::new(move || {
                        let _ = stop.send(true);
                        async {}.boxed()
                    }),
                )
                .await;
        }

        // Reaper: return long-stuck running tasks to pending while we run.
        {
            let store = self.store.clone();
            let max_run_time = self.config.scheduler.max_run_time_seconds;
            let mut stop_rx = self.reaper_stop.subscribe();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {
                            let bound = Utc::now() - ChronoDuration::seconds(max_run_time);
                            match store.reap_stale_tasks(bound).await {
                                Ok(0) => {}
                                Ok(n) => warn!("Reaped {} stuck running tasks", n),
                                Err(e) => error!("Reaper failed: {e}"),
                            }
                        }
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
            resources.register_task("task-reaper", handle).await;
            let stop = self.reaper_stop.clone();
            self.container
                .register_shutdown(
                    "task_reaper",
                    Box::new(move || {
                        let _ = stop.send(true);
                        async {}.boxed()
                    }),
                )
                .await;
        }

        if let Some(scheduler) = &self.backup_scheduler {
            let stop = scheduler.stop_handle();
            let handle = tokio::spawn(scheduler.clone().run());
            resources.register_task("backup-scheduler", handle).await;
            self.container
                .register_shutdown(
                    "backup_scheduler",
                    Box::new(move || {
                        let _ = stop.send(true);
                        async {}.boxed()
                    }),
                )
                .await;
        }

        info!("All background services running.");
        Ok(())
    }

    /// Orderly stop: ticker first so nothing new is submitted, then the
    /// queue workers with their full grace period, then the container's
    /// shutdown callbacks and resource cleanup.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        let _ = self.ticker.stop_handle().send(true);
        self.queue_manager.stop().await;
        self.container.shutdown().await;
        info!("Shutdown complete. Goodbye!");
    }
}
