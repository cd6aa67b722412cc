use std::time::Duration;

use anyhow::{bail, Result};

use jobsched::{
    admin::{CreateDefinitionRequest, CreateTriggerRequest},
    AdminService, Application, ShutdownManager,
};
use jobsched_core::{
    models::{ExecutionFilter, ExecutionStatus, JobParameters, PageRequest},
    AppConfig,
};

fn fast_config(database_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url.to_string();
    config.scheduler.node_id = Some("node-e2e".to_string());
    config.scheduler.poll_interval_ms = 100;
    config.scheduler.lease_duration_ms = 1_000;
    config
}

async fn schedule_every_second(admin: &AdminService) -> Result<i64> {
    let definition = admin
        .create_definition(CreateDefinitionRequest {
            code: "TICK".to_string(),
            name: "每秒心跳".to_string(),
            job_type: "logging".to_string(),
            description: None,
            enabled: None,
            max_retry_count: None,
            parameters: JobParameters::new(),
            log_level: None,
        })
        .await?;
    admin
        .create_trigger(CreateTriggerRequest::new(definition.id, "每秒", "* * * * * ?"))
        .await?;
    Ok(definition.id)
}

async fn wait_for_scheduled_success(admin: &AdminService, definition_id: i64) -> Result<()> {
    let filter = ExecutionFilter {
        job_definition_id: Some(definition_id),
        status: Some(ExecutionStatus::Success),
        ..Default::default()
    };
    for _ in 0..100 {
        let page = admin.list_executions(&filter, PageRequest::default()).await?;
        if let Some(execution) = page.items.first() {
            assert!(execution.correlation_id.starts_with("SCHED-"));
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("触发器没有在超时时间内产生成功的执行")
}

#[tokio::test]
async fn test_trigger_fires_end_to_end_in_memory() -> Result<()> {
    let app = Application::new(fast_config("memory")).await?;
    assert_eq!(app.node_id(), "node-e2e");
    let admin = app.admin();
    let definition_id = schedule_every_second(&admin).await?;

    let shutdown = ShutdownManager::new();
    let handle = tokio::spawn(app.run(shutdown.clone()));

    wait_for_scheduled_success(&admin, definition_id).await?;

    let trigger = &admin.list_triggers(Some(definition_id)).await?[0];
    assert!(trigger.fire_count >= 1);
    assert!(trigger.last_fire_time.is_some());

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_trigger_fires_end_to_end_with_sqlite_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("jobsched.db").display());

    let app = Application::new(fast_config(&url)).await?;
    let admin = app.admin();
    let definition_id = schedule_every_second(&admin).await?;

    let shutdown = ShutdownManager::new();
    let handle = tokio::spawn(app.run(shutdown.clone()));

    wait_for_scheduled_success(&admin, definition_id).await?;

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_disabled_scheduler_only_runs_manual_jobs() -> Result<()> {
    let mut config = fast_config("memory");
    config.scheduler.enabled = false;
    let app = Application::new(config).await?;
    let admin = app.admin();
    let definition_id = schedule_every_second(&admin).await?;

    let shutdown = ShutdownManager::new();
    let handle = tokio::spawn(app.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let page = admin
        .list_executions(
            &ExecutionFilter {
                job_definition_id: Some(definition_id),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await?;
    assert_eq!(page.total, 0);

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(10), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let mut config = fast_config("memory");
    config.scheduler.lease_duration_ms = 150;
    assert!(Application::new(config).await.is_err());
}
