use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;

use jobsched::{
    admin::{
        CreateDefinitionRequest, CreateTriggerRequest, DeleteOutcome, UpdateDefinitionRequest,
        UpdateTriggerRequest,
    },
    AdminService, Application,
};
use jobsched_core::{
    models::{
        ExecutionFilter, ExecutionStatus, JobParameters, PageRequest, ParameterValue, StatsQuery,
    },
    AppConfig, SchedulerError,
};

async fn admin() -> Result<std::sync::Arc<AdminService>> {
    let mut config = AppConfig::default();
    config.database.url = "memory".to_string();
    config.scheduler.node_id = Some("node-test".to_string());
    let app = Application::new(config).await?;
    Ok(app.admin())
}

fn definition_request(code: &str, job_type: &str) -> CreateDefinitionRequest {
    CreateDefinitionRequest {
        code: code.to_string(),
        name: format!("{} 作业", code),
        job_type: job_type.to_string(),
        description: None,
        enabled: None,
        max_retry_count: None,
        parameters: JobParameters::new(),
        log_level: None,
    }
}

async fn wait_terminal(admin: &AdminService, execution_id: i64) -> Result<ExecutionStatus> {
    for _ in 0..500 {
        let execution = admin.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(execution.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("执行 {} 未在超时时间内结束", execution_id)
}

#[tokio::test]
async fn test_definition_crud_and_duplicate_code() -> Result<()> {
    let admin = admin().await?;

    let created = admin
        .create_definition(definition_request("NIGHTLY", "logging"))
        .await?;
    assert_eq!(created.max_retry_count, 3);
    assert!(created.enabled);

    let result = admin
        .create_definition(definition_request("NIGHTLY", "logging"))
        .await;
    assert!(matches!(result, Err(SchedulerError::Conflict(_))));

    let updated = admin
        .update_definition(
            created.id,
            UpdateDefinitionRequest {
                name: Some("夜间作业".to_string()),
                max_retry_count: Some(1),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(updated.name, "夜间作业");
    assert_eq!(updated.max_retry_count, 1);

    let result = admin
        .update_definition(
            created.id,
            UpdateDefinitionRequest {
                max_retry_count: Some(-1),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));

    assert_eq!(admin.list_definitions().await?.len(), 1);
    assert!(matches!(
        admin.get_definition(999).await,
        Err(SchedulerError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_parameter_defaults_are_applied_on_create() -> Result<()> {
    let admin = admin().await?;
    let mut request = definition_request("CLEANUP", "data-cleanup");
    request.parameters = JobParameters::new().with("retention_days", ParameterValue::Integer(30));

    let created = admin.create_definition(request).await?;
    assert_eq!(created.parameters.get_i64("retention_days"), Some(30));
    assert_eq!(created.parameters.get_str("target"), Some("executions"));
    assert_eq!(created.parameters.get_bool("dry_run"), Some(true));
    Ok(())
}

#[tokio::test]
async fn test_trigger_creation_validates_and_schedules() -> Result<()> {
    let admin = admin().await?;
    let definition = admin
        .create_definition(definition_request("REPORT", "logging"))
        .await?;

    let before = Utc::now();
    let trigger = admin
        .create_trigger(CreateTriggerRequest::new(definition.id, "每5分钟", "0 */5 * * * ?"))
        .await?;
    let next = trigger.next_fire_time.expect("next fire time");
    assert!(next > before);
    assert!(next <= before + chrono::Duration::minutes(5));
    assert_eq!(trigger.fire_count, 0);

    let result = admin
        .create_trigger(CreateTriggerRequest::new(definition.id, "坏表达式", "0 61 * * * ?"))
        .await;
    assert!(matches!(result, Err(SchedulerError::ParseError { .. })));

    let mut request = CreateTriggerRequest::new(definition.id, "坏时区", "0 0 * * * ?");
    request.timezone = Some("Mars/Olympus".to_string());
    let result = admin.create_trigger(request).await;
    assert!(matches!(result, Err(SchedulerError::ParseError { .. })));

    let result = admin
        .create_trigger(CreateTriggerRequest::new(404, "孤儿", "0 0 * * * ?"))
        .await;
    assert!(matches!(result, Err(SchedulerError::NotFound { .. })));

    // 窗口已关闭的触发器创建为停用状态
    let mut request = CreateTriggerRequest::new(definition.id, "过期", "0 0 * * * ?");
    request.start_time = Some(before - chrono::Duration::days(2));
    request.end_time = Some(before - chrono::Duration::days(1));
    let expired = admin.create_trigger(request).await?;
    assert!(!expired.enabled);
    assert_eq!(expired.next_fire_time, None);

    assert_eq!(admin.list_triggers(Some(definition.id)).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_trigger_update_recomputes_next_fire_time() -> Result<()> {
    let admin = admin().await?;
    let definition = admin
        .create_definition(definition_request("HOURLY", "logging"))
        .await?;
    let trigger = admin
        .create_trigger(CreateTriggerRequest::new(definition.id, "每年", "0 0 0 1 1 ?"))
        .await?;

    let updated = admin
        .update_trigger(
            trigger.id,
            UpdateTriggerRequest {
                cron_expression: Some("0 * * * * ?".to_string()),
                ..Default::default()
            },
        )
        .await?;
    let next = updated.next_fire_time.expect("next fire time");
    assert!(next <= Utc::now() + chrono::Duration::minutes(1));
    assert_eq!(updated.claim_owner, None);

    let paused = admin
        .update_trigger(
            trigger.id,
            UpdateTriggerRequest {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await?;
    assert!(!paused.enabled);

    admin.delete_trigger(trigger.id).await?;
    assert!(matches!(
        admin.delete_trigger(trigger.id).await,
        Err(SchedulerError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_run_now_and_execution_queries() -> Result<()> {
    let admin = admin().await?;
    let mut request = definition_request("HELLO", "logging");
    request.parameters = JobParameters::new().with(
        "message",
        ParameterValue::String("你好".to_string()),
    );
    let definition = admin.create_definition(request).await?;

    let execution_id = admin.run_now(definition.id).await?;
    assert_eq!(wait_terminal(&admin, execution_id).await?, ExecutionStatus::Success);

    let execution = admin.get_execution(execution_id).await?;
    assert!(execution.correlation_id.starts_with("MANUAL-"));
    assert_eq!(execution.node_id.as_deref(), Some("node-test"));

    let logs = admin.execution_logs(execution_id).await?;
    assert!(logs.iter().any(|entry| entry.message.contains("你好")));
    assert!(matches!(
        admin.execution_logs(9999).await,
        Err(SchedulerError::NotFound { .. })
    ));

    let page = admin
        .list_executions(
            &ExecutionFilter {
                job_definition_id: Some(definition.id),
                status: Some(ExecutionStatus::Success),
                ..Default::default()
            },
            PageRequest::new(0, 10),
        )
        .await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, execution_id);
    Ok(())
}

#[tokio::test]
async fn test_run_now_with_invalid_parameters_is_rejected() -> Result<()> {
    let admin = admin().await?;
    let definition = admin
        .create_definition(definition_request("CLEANUP", "data-cleanup"))
        .await?;

    let result = admin.run_now(definition.id).await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));

    let page = admin
        .list_executions(
            &ExecutionFilter {
                job_definition_id: Some(definition.id),
                ..Default::default()
            },
            PageRequest::new(0, 10),
        )
        .await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].status, ExecutionStatus::Failed);
    assert_eq!(page.items[0].started_at, None);
    Ok(())
}

#[tokio::test]
async fn test_cancel_batch_job() -> Result<()> {
    let admin = admin().await?;
    let mut request = definition_request("BATCH", "batch-processing");
    request.parameters = JobParameters::new()
        .with("total_records", ParameterValue::Integer(100_000))
        .with("batch_size", ParameterValue::Integer(1));
    let definition = admin.create_definition(request).await?;

    let execution_id = admin.run_now(definition.id).await?;
    for _ in 0..500 {
        if admin.get_execution(execution_id).await?.status == ExecutionStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    admin.cancel_execution(execution_id).await?;
    assert_eq!(
        wait_terminal(&admin, execution_id).await?,
        ExecutionStatus::Cancelled
    );

    // 再次取消已结束的执行
    assert!(matches!(
        admin.cancel_execution(execution_id).await,
        Err(SchedulerError::InvalidStateTransition { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_delete_definition_soft_deactivates_when_referenced() -> Result<()> {
    let admin = admin().await?;
    let used = admin
        .create_definition(definition_request("USED", "logging"))
        .await?;
    let unused = admin
        .create_definition(definition_request("UNUSED", "logging"))
        .await?;
    admin
        .create_trigger(CreateTriggerRequest::new(unused.id, "每小时", "0 0 * * * ?"))
        .await?;

    let execution_id = admin.run_now(used.id).await?;
    wait_terminal(&admin, execution_id).await?;

    assert_eq!(admin.delete_definition(used.id).await?, DeleteOutcome::Deactivated);
    assert!(!admin.get_definition(used.id).await?.enabled);

    assert_eq!(admin.delete_definition(unused.id).await?, DeleteOutcome::Deleted);
    assert!(admin.list_triggers(Some(unused.id)).await?.is_empty());
    assert!(matches!(
        admin.get_definition(unused.id).await,
        Err(SchedulerError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_stats_and_job_catalogue() -> Result<()> {
    let admin = admin().await?;
    let definition = admin
        .create_definition(definition_request("STATS", "logging"))
        .await?;
    admin
        .create_trigger(CreateTriggerRequest::new(definition.id, "每小时", "0 0 * * * ?"))
        .await?;

    let execution_id = admin.run_now(definition.id).await?;
    wait_terminal(&admin, execution_id).await?;

    let now = Utc::now() + chrono::Duration::seconds(1);
    let stats = admin.stats(&StatsQuery::last_days(now, 1)).await?;
    assert_eq!(stats.total_definitions, 1);
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.successful_executions, 1);
    assert_eq!(stats.success_rate, 100.0);

    let mut inverted = StatsQuery::last_days(now, 1);
    inverted.to = inverted.from;
    assert!(matches!(
        admin.stats(&inverted).await,
        Err(SchedulerError::Validation(_))
    ));

    let catalogue = admin.job_types().await;
    let types: Vec<&str> = catalogue.iter().map(|info| info.job_type.as_str()).collect();
    assert_eq!(types, vec!["batch-processing", "data-cleanup", "logging"]);
    assert!(catalogue[0].abortable);
    assert_eq!(catalogue[1].parameters.len(), 3);
    Ok(())
}
