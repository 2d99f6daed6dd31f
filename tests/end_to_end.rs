use std::time::Duration;

use marketmind::application::Application;
use marketmind::config::Config;
use marketmind::domain::portfolio::PortfolioSnapshot;
use marketmind::domain::task::{TaskSpec, TaskType};

fn test_config() -> Config {
    let mut config = Config::from_env().expect("defaults parse");
    config.database_url = "sqlite://:memory:".to_string();
    config.scheduler.tick_interval_seconds = 1;
    config.scheduler.worker_poll_ms = 50;
    config.scheduler.market_hours_only = false;
    config.backup.enabled = false;
    config
}

/// Full lifecycle: build wires the container, the ticker schedules the
/// health check, workers execute it, execution history fills, and shutdown
/// stops everything.
#[tokio::test]
async fn test_scheduled_health_checks_flow_end_to_end() {
    let app = Application::build(test_config()).await.unwrap();

    // Narrow the schedule to a fast health check only.
    for spec in app.store.list_task_specs().await.unwrap() {
        let enabled = spec.task_name == TaskType::HealthCheck;
        let mut spec = spec;
        spec.enabled = enabled;
        spec.frequency_seconds = 2;
        app.store.upsert_task_spec(&spec).await.unwrap();
    }

    app.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    app.shutdown().await;

    let completed = app.store.count_tasks_by_status("completed").await.unwrap();
    assert!(completed >= 2, "expected >= 2 completed health checks, got {completed}");

    let records = app
        .store
        .query_execution(Some("health_check"), 50)
        .await
        .unwrap();
    assert!(records.iter().filter(|r| r.status == "completed").count() >= 2);

    // No task is left in running after an orderly shutdown of idle queues.
    assert_eq!(app.store.count_tasks_by_status("running").await.unwrap(), 0);

    let stats = app.tracker.stats().await;
    assert!(stats.completed >= 2);
    assert_eq!(stats.failed, 0);
}

/// Checkpoint round trip through the application-level store wiring.
#[tokio::test]
async fn test_checkpoint_round_trip_through_application() {
    let app = Application::build(test_config()).await.unwrap();

    let mut snapshot = PortfolioSnapshot::empty();
    snapshot
        .cash
        .insert("INR".to_string(), rust_decimal::Decimal::from(500_000));
    app.store.put_portfolio(&snapshot).await.unwrap();

    let checkpoint_id = app
        .store
        .create_checkpoint("nightly", None)
        .await
        .unwrap();

    let mut drained = snapshot.clone();
    drained
        .cash
        .insert("INR".to_string(), rust_decimal::Decimal::ZERO);
    app.store.put_portfolio(&drained).await.unwrap();

    assert!(app.store.restore_checkpoint(&checkpoint_id).await.unwrap());
    let restored = app.store.get_portfolio().await.unwrap().unwrap();
    assert_eq!(
        restored.cash["INR"],
        rust_decimal::Decimal::from(500_000)
    );

    // Seeding again must not clobber the operator-narrowed schedule.
    let specs_before = app.store.list_task_specs().await.unwrap();
    app.store
        .seed_task_specs(&[TaskSpec::new(TaskType::HealthCheck, 300, 1)])
        .await
        .unwrap();
    let specs_after = app.store.list_task_specs().await.unwrap();
    assert_eq!(specs_before.len(), specs_after.len());
}
