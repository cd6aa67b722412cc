use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::task::JoinSet;

use jobsched_core::{
    models::{ExecutionOrigin, MisfirePolicy, Trigger},
    traits::{JobLauncher, LaunchOutcome},
    SchedulerError, SchedulerResult,
};
use jobsched_dispatcher::{TriggerScheduler, TriggerSchedulerConfig};
use jobsched_infrastructure::{InMemoryStore, MetricsCollector, Repositories};
use jobsched_testing_utils::{JobDefinitionBuilder, TriggerBuilder};

#[derive(Clone, Copy)]
enum LaunchMode {
    Accept,
    Skip,
    Fail,
}

/// 只记录派发请求的启动器
struct RecordingLauncher {
    mode: LaunchMode,
    launches: Mutex<Vec<(i64, ExecutionOrigin)>>,
}

impl RecordingLauncher {
    fn new(mode: LaunchMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            launches: Mutex::new(Vec::new()),
        })
    }

    fn launches(&self) -> Vec<(i64, ExecutionOrigin)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobLauncher for RecordingLauncher {
    async fn launch(
        &self,
        job_definition_id: i64,
        origin: ExecutionOrigin,
    ) -> SchedulerResult<LaunchOutcome> {
        let mut launches = self.launches.lock().unwrap();
        launches.push((job_definition_id, origin));
        match self.mode {
            LaunchMode::Accept => Ok(LaunchOutcome::Accepted {
                execution_id: launches.len() as i64,
            }),
            LaunchMode::Skip => Ok(LaunchOutcome::Skipped {
                reason: "已有执行在运行".to_string(),
            }),
            LaunchMode::Fail => Err(SchedulerError::Validation("缺少参数".to_string())),
        }
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

fn scheduler(
    repos: &Repositories,
    launcher: Arc<RecordingLauncher>,
    node_id: &str,
) -> TriggerScheduler {
    TriggerScheduler::new(
        repos.triggers.clone(),
        launcher,
        Arc::new(MetricsCollector::new()),
        TriggerSchedulerConfig {
            node_id: node_id.to_string(),
            poll_interval: StdDuration::from_secs(1),
            lease_duration: StdDuration::from_secs(30),
            batch_size: 100,
        },
    )
}

async fn seed(repos: &Repositories, trigger: TriggerBuilder) -> Result<Trigger> {
    let definition = repos
        .definitions
        .create(&JobDefinitionBuilder::new().build())
        .await?;
    Ok(repos
        .triggers
        .create(&trigger.with_definition_id(definition.id).build())
        .await?)
}

fn every_five_minutes() -> TriggerBuilder {
    TriggerBuilder::new()
        .with_cron("0 */5 * * * ?")
        .with_next_fire_time(at(12, 5, 0))
}

#[tokio::test]
async fn test_due_trigger_fires_and_advances() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(&repos, every_five_minutes()).await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);
    let scheduler = scheduler(&repos, launcher.clone(), "node-a");

    // 还没到时间
    let report = scheduler.run_cycle(at(12, 4, 59)).await?;
    assert_eq!(report.due, 0);
    assert!(launcher.launches().is_empty());

    let report = scheduler
        .run_cycle(at(12, 5, 0) + Duration::milliseconds(200))
        .await?;
    assert_eq!(report.fired, 1);

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, trigger.job_definition_id);
    assert_eq!(
        launches[0].1,
        ExecutionOrigin::Scheduled {
            trigger_id: trigger.id
        }
    );

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 1);
    assert_eq!(stored.last_fire_time, Some(at(12, 5, 0)));
    assert_eq!(stored.next_fire_time, Some(at(12, 10, 0)));
    assert!(stored.enabled);
    assert_eq!(stored.claim_owner, None);
    Ok(())
}

#[tokio::test]
async fn test_do_nothing_misfire_skips_and_resyncs() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(
        &repos,
        TriggerBuilder::new()
            .with_cron("0 */5 * * * ?")
            .with_next_fire_time(at(12, 0, 0))
            .with_misfire_policy(MisfirePolicy::DoNothing),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    let report = scheduler(&repos, launcher.clone(), "node-a")
        .run_cycle(at(12, 10, 0))
        .await?;
    assert_eq!(report.misfires_skipped, 1);
    assert_eq!(report.fired, 0);
    assert!(launcher.launches().is_empty());

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 0);
    assert_eq!(stored.last_fire_time, None);
    assert_eq!(stored.next_fire_time, Some(at(12, 15, 0)));
    Ok(())
}

#[tokio::test]
async fn test_fire_once_now_misfire_fires_once() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(
        &repos,
        TriggerBuilder::new()
            .with_cron("0 */5 * * * ?")
            .with_next_fire_time(at(12, 0, 0))
            .with_misfire_policy(MisfirePolicy::SmartPolicy),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    scheduler(&repos, launcher.clone(), "node-a")
        .run_cycle(at(12, 10, 0))
        .await?;
    assert_eq!(launcher.launches().len(), 1);

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 1);
    assert_eq!(stored.last_fire_time, Some(at(12, 0, 0)));
    assert_eq!(stored.next_fire_time, Some(at(12, 15, 0)));
    Ok(())
}

#[tokio::test]
async fn test_delay_of_exactly_one_poll_interval_is_not_a_misfire() -> Result<()> {
    let repos = Repositories::in_memory();
    seed(
        &repos,
        every_five_minutes().with_misfire_policy(MisfirePolicy::DoNothing),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    let report = scheduler(&repos, launcher.clone(), "node-a")
        .run_cycle(at(12, 5, 1))
        .await?;
    assert_eq!(report.fired, 1);
    assert_eq!(launcher.launches().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_node_fires_each_occurrence() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let repos = Repositories::from_store(store);
    let trigger = seed(&repos, every_five_minutes()).await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    let now = at(12, 5, 0);
    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let scheduler = scheduler(&repos, launcher.clone(), &format!("node-{}", i));
        tasks.spawn(async move { scheduler.run_cycle(now).await });
    }

    let mut fired = 0;
    while let Some(result) = tasks.join_next().await {
        fired += result??.fired;
    }

    assert_eq!(fired, 1);
    assert_eq!(launcher.launches().len(), 1);
    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 1);
    assert_eq!(stored.next_fire_time, Some(at(12, 10, 0)));
    Ok(())
}

#[tokio::test]
async fn test_live_claim_of_other_node_is_respected() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(&repos, every_five_minutes()).await?;
    let now = at(12, 5, 0);
    assert!(
        repos
            .triggers
            .try_claim(trigger.id, "node-b", now, now + Duration::seconds(30))
            .await?
    );

    let launcher = RecordingLauncher::new(LaunchMode::Accept);
    let scheduler = scheduler(&repos, launcher.clone(), "node-a");
    let report = scheduler.run_cycle(now).await?;
    assert_eq!(report.claims_lost, 1);
    assert!(launcher.launches().is_empty());

    // node-b 宕机，租约到期后由 node-a 接管
    let report = scheduler.run_cycle(now + Duration::seconds(30)).await?;
    assert_eq!(report.fired, 1);
    assert_eq!(launcher.launches().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_max_fire_count_disables_trigger() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(
        &repos,
        every_five_minutes().with_fire_count(1).with_max_fire_count(2),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    scheduler(&repos, launcher.clone(), "node-a")
        .run_cycle(at(12, 5, 0))
        .await?;

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 2);
    assert!(!stored.enabled);
    assert_eq!(stored.next_fire_time, None);
    assert!(repos.triggers.find_due(at(13, 0, 0), 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_end_time_disables_trigger() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(
        &repos,
        every_five_minutes().with_window(None, Some(at(12, 7, 0))),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);

    scheduler(&repos, launcher.clone(), "node-a")
        .run_cycle(at(12, 5, 0))
        .await?;

    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 1);
    assert!(!stored.enabled);
    assert_eq!(stored.next_fire_time, None);
    Ok(())
}

#[tokio::test]
async fn test_failed_or_skipped_launch_still_counts_the_occurrence() -> Result<()> {
    for mode in [LaunchMode::Skip, LaunchMode::Fail] {
        let repos = Repositories::in_memory();
        let trigger = seed(&repos, every_five_minutes()).await?;
        let launcher = RecordingLauncher::new(mode);

        let report = scheduler(&repos, launcher.clone(), "node-a")
            .run_cycle(at(12, 5, 0))
            .await?;
        assert_eq!(report.errors, 0);

        let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
        assert_eq!(stored.fire_count, 1);
        assert_eq!(stored.next_fire_time, Some(at(12, 10, 0)));
        assert_eq!(stored.claim_owner, None);
    }
    Ok(())
}

#[tokio::test]
async fn test_ignore_misfire_fires_each_missed_occurrence() -> Result<()> {
    let repos = Repositories::in_memory();
    let trigger = seed(
        &repos,
        TriggerBuilder::new()
            .with_cron("0 */5 * * * ?")
            .with_next_fire_time(at(12, 0, 0))
            .with_misfire_policy(MisfirePolicy::IgnoreMisfire),
    )
    .await?;
    let launcher = RecordingLauncher::new(LaunchMode::Accept);
    let scheduler = scheduler(&repos, launcher.clone(), "node-a");

    let now = at(12, 10, 0);
    scheduler.run_cycle(now).await?;
    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.last_fire_time, Some(at(12, 0, 0)));
    assert_eq!(stored.next_fire_time, Some(at(12, 5, 0)));

    // 之后的周期依次补上 12:05 和 12:10，然后回到正常节奏
    scheduler.run_cycle(now).await?;
    scheduler.run_cycle(now).await?;
    let report = scheduler.run_cycle(now).await?;
    assert_eq!(report.due, 0);

    assert_eq!(launcher.launches().len(), 3);
    let stored = repos.triggers.get_by_id(trigger.id).await?.unwrap();
    assert_eq!(stored.fire_count, 3);
    assert_eq!(stored.last_fire_time, Some(at(12, 10, 0)));
    assert_eq!(stored.next_fire_time, Some(at(12, 15, 0)));
    Ok(())
}
