use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::domain::events::{Event, EventType};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::BackupManager;

/// Sleep applied after a failed backup attempt before the loop resumes.
const ERROR_BACKOFF: Duration = Duration::from_secs(300);

/// Drives periodic database backups in the background.
///
/// Checks every `tick_interval` (60 s in production) whether the configured
/// interval has elapsed since the last successful backup. The first check
/// after start backs up immediately. Failures log and retry on a later
/// tick; the rest of the system never blocks on backups.
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    bus: EventBus,
    backup_interval: Duration,
    tick_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl BackupScheduler {
    pub fn new(manager: Arc<BackupManager>, bus: EventBus, backup_interval: Duration) -> Self {
        Self::with_tick_interval(manager, bus, backup_interval, Duration::from_secs(60))
    }

    pub fn with_tick_interval(
        manager: Arc<BackupManager>,
        bus: EventBus,
        backup_interval: Duration,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            manager,
            bus,
            backup_interval,
            tick_interval,
            shutdown_tx,
        }
    }

    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "Backup scheduler started: every {:?}",
            self.backup_interval
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut last_backup: Option<std::time::Instant> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let due = match last_backup {
                None => true,
                Some(at) => at.elapsed() >= self.backup_interval,
            };

            let mut sleep_for = self.tick_interval;
            if due {
                match self.manager.create_backup("periodic").await {
                    Some(path) => {
                        last_backup = Some(std::time::Instant::now());
                        self.bus
                            .publish(Event::new(
                                EventType::BackupCompleted,
                                "backup_scheduler",
                                json!({ "path": path.display().to_string() }),
                            ))
                            .await;
                    }
                    None => {
                        error!("Periodic backup failed, retrying later");
                        sleep_for = ERROR_BACKOFF;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!("Backup scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventType;
    use crate::infrastructure::event_bus::EventHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_tick_backs_up_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        tokio::fs::write(&db_path, b"data").await.unwrap();

        let manager = Arc::new(BackupManager::new(
            db_path,
            Some(dir.path().join("backups")),
            7,
        ));
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            EventType::BackupCompleted,
            Arc::new(Counter {
                count: Arc::clone(&count),
            }),
        )
        .await;

        let scheduler = Arc::new(BackupScheduler::with_tick_interval(
            manager.clone(),
            bus,
            Duration::from_secs(3600),
            Duration::from_millis(20),
        ));
        let stop = scheduler.stop_handle();
        let run = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = stop.send(true);
        let _ = run.await;

        // Exactly one backup: the warm-up one; the long interval prevents a
        // second.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().await.backup_count, 1);
    }
}
