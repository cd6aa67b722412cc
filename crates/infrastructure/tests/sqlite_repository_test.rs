use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};

use jobsched_core::{
    models::{
        DefinitionSummary, ExecutionFilter, ExecutionStatus, ExecutionTransition, LogEntry,
        LogLevel, NodeInfo, PageRequest, StatsQuery, TriggerFireUpdate,
    },
    traits::{
        ExecutionRepository, JobDefinitionRepository, NodeRepository, StatsRepository,
        TriggerRepository,
    },
    DefinitionStatus, SchedulerError,
};
use jobsched_infrastructure::{DatabaseManager, Repositories};
use jobsched_testing_utils::{ExecutionBuilder, JobDefinitionBuilder, TriggerBuilder};

async fn setup() -> Result<(DatabaseManager, Repositories)> {
    let manager = DatabaseManager::in_memory().await?;
    let repos = Repositories::sqlite(manager.pool().clone());
    Ok((manager, repos))
}

#[tokio::test]
async fn test_definition_crud_and_duplicate_code() -> Result<()> {
    let (_db, repos) = setup().await?;

    let created = repos
        .definitions
        .create(&JobDefinitionBuilder::new().with_code("REPORT").build())
        .await?;
    assert!(created.id > 0);

    let loaded = repos.definitions.get_by_code("REPORT").await?.unwrap();
    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.status, DefinitionStatus::Unknown);

    let duplicate = repos
        .definitions
        .create(&JobDefinitionBuilder::new().with_code("REPORT").with_name("另一个").build())
        .await;
    assert!(matches!(duplicate, Err(SchedulerError::Conflict(_))));

    // 已有定义不受影响
    let still = repos.definitions.get_by_id(created.id).await?.unwrap();
    assert_eq!(still.name, created.name);
    assert_eq!(repos.definitions.list().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_update_clamps_retry_count() -> Result<()> {
    let (_db, repos) = setup().await?;
    let created = repos
        .definitions
        .create(
            &JobDefinitionBuilder::new()
                .with_max_retry_count(5)
                .with_retry_count(4)
                .build(),
        )
        .await?;

    let mut changed = created.clone();
    changed.max_retry_count = 2;
    changed.name = "改名".to_string();
    let updated = repos.definitions.update(&changed).await?;

    assert_eq!(updated.name, "改名");
    assert_eq!(updated.max_retry_count, 2);
    assert_eq!(updated.retry_count, 2);

    let mut missing = changed.clone();
    missing.id = 999;
    assert!(matches!(
        repos.definitions.update(&missing).await,
        Err(SchedulerError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_trigger_requires_existing_definition() -> Result<()> {
    let (_db, repos) = setup().await?;
    let result = repos
        .triggers
        .create(&TriggerBuilder::new().with_definition_id(42).build())
        .await;
    assert!(matches!(result, Err(SchedulerError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_claim_is_exclusive_until_lease_expires() -> Result<()> {
    let (_db, repos) = setup().await?;
    let definition = repos.definitions.create(&JobDefinitionBuilder::new().build()).await?;
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let trigger = repos
        .triggers
        .create(
            &TriggerBuilder::new()
                .with_definition_id(definition.id)
                .with_next_fire_time(now)
                .build(),
        )
        .await?;

    let lease = now + Duration::seconds(30);
    assert!(repos.triggers.try_claim(trigger.id, "node-a", now, lease).await?);
    assert!(!repos.triggers.try_claim(trigger.id, "node-b", now, lease).await?);
    assert!(
        !repos
            .triggers
            .try_claim(trigger.id, "node-b", now + Duration::seconds(29), lease)
            .await?
    );

    // 租约到期后可被其他节点接管
    let later = now + Duration::seconds(30);
    assert!(
        repos
            .triggers
            .try_claim(trigger.id, "node-b", later, later + Duration::seconds(30))
            .await?
    );

    // 旧持有者无法再写回
    let update = TriggerFireUpdate {
        last_fire_time: Some(now),
        next_fire_time: Some(now + Duration::minutes(1)),
        fire_count: 1,
        enabled: true,
    };
    assert!(!repos.triggers.complete_fire(trigger.id, "node-a", &update).await?);
    assert!(repos.triggers.complete_fire(trigger.id, "node-b", &update).await?);

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 1);
    assert_eq!(stored.last_fire_time, Some(now));
    assert_eq!(stored.claim_owner, None);
    assert_eq!(stored.claim_expiry, None);
    Ok(())
}

#[tokio::test]
async fn test_find_due_orders_by_priority_and_skips_disabled_definitions() -> Result<()> {
    let (_db, repos) = setup().await?;
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let active = repos
        .definitions
        .create(&JobDefinitionBuilder::new().with_code("ACTIVE").build())
        .await?;
    let inactive = repos
        .definitions
        .create(&JobDefinitionBuilder::new().with_code("INACTIVE").disabled().build())
        .await?;

    let low = repos
        .triggers
        .create(
            &TriggerBuilder::new()
                .with_definition_id(active.id)
                .with_name("low")
                .with_priority(1)
                .with_next_fire_time(now - Duration::minutes(5))
                .build(),
        )
        .await?;
    let high = repos
        .triggers
        .create(
            &TriggerBuilder::new()
                .with_definition_id(active.id)
                .with_name("high")
                .with_priority(9)
                .with_next_fire_time(now)
                .build(),
        )
        .await?;
    repos
        .triggers
        .create(
            &TriggerBuilder::new()
                .with_definition_id(inactive.id)
                .with_next_fire_time(now)
                .build(),
        )
        .await?;
    repos
        .triggers
        .create(
            &TriggerBuilder::new()
                .with_definition_id(active.id)
                .with_name("future")
                .with_next_fire_time(now + Duration::seconds(1))
                .build(),
        )
        .await?;

    let due = repos.triggers.find_due(now, 10).await?;
    let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![high.id, low.id]);
    Ok(())
}

#[tokio::test]
async fn test_execution_transition_is_conditional() -> Result<()> {
    let (_db, repos) = setup().await?;
    let definition = repos.definitions.create(&JobDefinitionBuilder::new().build()).await?;
    let execution = repos
        .executions
        .create(&ExecutionBuilder::new().with_definition_id(definition.id).build())
        .await?;

    let now = Utc::now();
    let start = ExecutionTransition {
        execution_id: execution.id,
        from: ExecutionStatus::Queued,
        to: ExecutionStatus::Running,
        at: now,
        message: None,
        error: None,
    };
    assert!(repos.executions.transition(&start).await?);
    // 同一个转换第二次不再生效
    assert!(!repos.executions.transition(&start).await?);

    assert!(repos.executions.request_cancel(execution.id).await?);
    assert!(repos.executions.is_cancel_requested(execution.id).await?);

    let finish = ExecutionTransition {
        execution_id: execution.id,
        from: ExecutionStatus::Running,
        to: ExecutionStatus::Cancelled,
        at: now + Duration::milliseconds(150),
        message: Some("已取消".to_string()),
        error: None,
    };
    assert!(repos.executions.transition(&finish).await?);

    let stored = repos.executions.get_by_id(execution.id).await?.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert_eq!(stored.result_message.as_deref(), Some("已取消"));
    assert_eq!(stored.duration_ms(), Some(150));
    // 终态之后不再接受取消请求
    assert!(!repos.executions.request_cancel(execution.id).await?);
    assert!(repos.executions.find_active_by_definition(definition.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_execution_list_and_logs() -> Result<()> {
    let (_db, repos) = setup().await?;
    let definition = repos.definitions.create(&JobDefinitionBuilder::new().build()).await?;
    for status in [
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::Success,
    ] {
        repos
            .executions
            .create(
                &ExecutionBuilder::new()
                    .with_definition_id(definition.id)
                    .with_status(status)
                    .build(),
            )
            .await?;
    }

    let page = repos
        .executions
        .list(&ExecutionFilter::default(), PageRequest::new(0, 2))
        .await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].id > page.items[1].id);

    let failed_only = ExecutionFilter {
        status: Some(ExecutionStatus::Failed),
        ..Default::default()
    };
    let page = repos
        .executions
        .list(&failed_only, PageRequest::new(0, 10))
        .await?;
    assert_eq!(page.total, 1);
    assert_eq!(repos.executions.count_by_definition(definition.id).await?, 3);

    let execution_id = page.items[0].id;
    repos
        .executions
        .append_logs(
            execution_id,
            &[
                LogEntry::new(LogLevel::Info, "开始"),
                LogEntry::new(LogLevel::Warn, "重试中"),
            ],
        )
        .await?;
    repos
        .executions
        .append_logs(execution_id, &[LogEntry::new(LogLevel::Error, "失败")])
        .await?;

    let messages: Vec<String> = repos
        .executions
        .get_logs(execution_id)
        .await?
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, vec!["开始", "重试中", "失败"]);
    Ok(())
}

#[tokio::test]
async fn test_node_heartbeat_upsert() -> Result<()> {
    let (_db, repos) = setup().await?;
    let now = Utc::now();
    let mut node = NodeInfo {
        node_id: "node-a".to_string(),
        hostname: "host-a".to_string(),
        started_at: now - Duration::minutes(10),
        last_heartbeat: now - Duration::minutes(5),
    };
    repos.nodes.heartbeat(&node).await?;
    assert!(repos.nodes.list_alive(now - Duration::minutes(1)).await?.is_empty());

    node.last_heartbeat = now;
    repos.nodes.heartbeat(&node).await?;
    let alive = repos.nodes.list_alive(now - Duration::minutes(1)).await?;
    assert_eq!(alive.len(), 1);
    assert_eq!(alive[0].started_at, node.started_at);
    Ok(())
}

#[tokio::test]
async fn test_stats_snapshot_window() -> Result<()> {
    let (_db, repos) = setup().await?;
    let definition = repos
        .definitions
        .create(&JobDefinitionBuilder::new().with_code("STATS").build())
        .await?;
    let trigger = repos
        .triggers
        .create(&TriggerBuilder::new().with_definition_id(definition.id).build())
        .await?;
    let mut paused = trigger.clone();
    paused.name = "paused".to_string();
    paused.enabled = false;
    repos.triggers.create(&paused).await?;

    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let to = from + Duration::days(1);
    for created_at in [from - Duration::seconds(1), from, to - Duration::seconds(1), to] {
        repos
            .executions
            .create(
                &ExecutionBuilder::new()
                    .with_definition_id(definition.id)
                    .with_status(ExecutionStatus::Success)
                    .with_created_at(created_at)
                    .build(),
            )
            .await?;
    }

    let mut query = StatsQuery::last_days(to, 1);
    query.from = from;
    let snapshot = repos.stats.snapshot(&query).await?;

    assert_eq!(
        snapshot.definitions,
        vec![DefinitionSummary {
            id: definition.id,
            code: "STATS".to_string(),
            name: definition.name.clone(),
            enabled: true,
            status: DefinitionStatus::Unknown,
        }]
    );
    assert_eq!(snapshot.trigger_enabled, vec![true, false]);
    assert_eq!(snapshot.executions.len(), 2);
    Ok(())
}
