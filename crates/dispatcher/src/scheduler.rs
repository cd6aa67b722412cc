use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use jobsched_core::{
    config::SchedulerConfig,
    models::{ExecutionOrigin, Trigger, TriggerFireUpdate},
    traits::{JobLauncher, LaunchOutcome, TriggerRepository},
    SchedulerError, SchedulerResult,
};
use jobsched_infrastructure::MetricsCollector;

use crate::cron::{parse_timezone, CronExpression};
use crate::misfire::{is_misfired, resolve_misfire, MisfireAction};

/// 严格晚于 `after` 的下一次触发时间
///
/// 不早于 `start_time`；超过 `end_time` 时返回 `None`。
pub fn compute_next_fire(
    trigger: &Trigger,
    after: DateTime<Utc>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    let cron = CronExpression::parse(&trigger.cron_expression)?;
    let tz = parse_timezone(&trigger.timezone)?;

    // start_time 本身也是合法的触发时刻
    let after = match trigger.start_time {
        Some(start) if start - chrono::Duration::milliseconds(1) > after => {
            start - chrono::Duration::milliseconds(1)
        }
        _ => after,
    };

    let next = cron.next_after(after, tz)?;
    Ok(match trigger.end_time {
        Some(end) if next > end => None,
        _ => Some(next),
    })
}

#[derive(Debug, Clone)]
pub struct TriggerSchedulerConfig {
    pub node_id: String,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    pub batch_size: usize,
}

impl TriggerSchedulerConfig {
    pub fn from_config(config: &SchedulerConfig, node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            poll_interval: config.poll_interval(),
            lease_duration: config.lease_duration(),
            batch_size: config.batch_size,
        }
    }

    fn poll_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.poll_interval.as_millis() as i64)
    }

    fn lease_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_duration.as_millis() as i64)
    }
}

/// 一个调度周期的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 查询到的到期触发器数量
    pub due: usize,
    pub fired: usize,
    /// 因 DO_NOTHING 丢弃的错过触发
    pub misfires_skipped: usize,
    pub claims_lost: usize,
    pub errors: usize,
}

enum TriggerOutcome {
    Fired,
    MisfireSkipped,
}

/// 触发器调度器
///
/// 每个节点运行一个实例。多个节点共享同一个存储时，同一次触发只会被
/// 认领成功的那个节点处理。
pub struct TriggerScheduler {
    trigger_repo: Arc<dyn TriggerRepository>,
    launcher: Arc<dyn JobLauncher>,
    metrics: Arc<MetricsCollector>,
    config: TriggerSchedulerConfig,
}

impl TriggerScheduler {
    pub fn new(
        trigger_repo: Arc<dyn TriggerRepository>,
        launcher: Arc<dyn JobLauncher>,
        metrics: Arc<MetricsCollector>,
        config: TriggerSchedulerConfig,
    ) -> Self {
        Self {
            trigger_repo,
            launcher,
            metrics,
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// 处理一批到期触发器
    ///
    /// 单个触发器的错误只记录日志，不中断本周期。
    #[instrument(skip(self), fields(node_id = %self.config.node_id))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let start_time = Instant::now();
        let due = self
            .trigger_repo
            .find_due(now, self.config.batch_size)
            .await?;

        let mut report = CycleReport {
            due: due.len(),
            ..Default::default()
        };

        for trigger in &due {
            match self.process_trigger(trigger, now).await {
                Ok(TriggerOutcome::Fired) => report.fired += 1,
                Ok(TriggerOutcome::MisfireSkipped) => report.misfires_skipped += 1,
                Err(SchedulerError::ClaimConflict { trigger_id }) => {
                    debug!("触发器 {} 已被其他节点处理，跳过", trigger_id);
                    report.claims_lost += 1;
                }
                Err(e) => {
                    error!(trigger_id = trigger.id, "处理触发器失败: {}", e);
                    report.errors += 1;
                }
            }
        }

        self.metrics
            .record_scheduling_cycle(start_time.elapsed().as_secs_f64(), report.fired);
        if report.due > 0 {
            info!(
                due = report.due,
                fired = report.fired,
                skipped = report.misfires_skipped,
                lost = report.claims_lost,
                "本次调度周期完成"
            );
        }
        Ok(report)
    }

    async fn process_trigger(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> SchedulerResult<TriggerOutcome> {
        let lease_until = now + self.config.lease_duration_chrono();
        let won = self
            .trigger_repo
            .try_claim(trigger.id, &self.config.node_id, now, lease_until)
            .await?;
        self.metrics.record_claim(won);
        if !won {
            return Err(SchedulerError::ClaimConflict {
                trigger_id: trigger.id,
            });
        }

        // 认领期间别的节点可能刚处理完这次触发并释放了租约
        let current = self.trigger_repo.get_by_id(trigger.id).await?;
        let current = match current {
            Some(current)
                if current.enabled && current.next_fire_time == trigger.next_fire_time =>
            {
                current
            }
            _ => {
                self.release(trigger.id).await;
                return Err(SchedulerError::ClaimConflict {
                    trigger_id: trigger.id,
                });
            }
        };

        let result = self.fire_claimed(&current, now).await;
        if result.is_err() {
            self.release(trigger.id).await;
        }
        result
    }

    async fn fire_claimed(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> SchedulerResult<TriggerOutcome> {
        let scheduled = trigger.next_fire_time.ok_or_else(|| {
            SchedulerError::Internal(format!("触发器 {} 没有下一次触发时间", trigger.id))
        })?;
        let poll_interval = self.config.poll_interval_chrono();
        let action = resolve_misfire(scheduled, now, poll_interval, trigger.misfire_policy);

        if action.fires() {
            let origin = ExecutionOrigin::Scheduled {
                trigger_id: trigger.id,
            };
            match self.launcher.launch(trigger.job_definition_id, origin).await {
                Ok(LaunchOutcome::Accepted { execution_id }) => {
                    info!(
                        trigger_id = trigger.id,
                        execution_id = execution_id,
                        scheduled = %scheduled,
                        "触发器 {} 已触发",
                        trigger.name
                    );
                }
                Ok(LaunchOutcome::Skipped { reason }) => {
                    info!(trigger_id = trigger.id, "触发器 {} 本次未执行: {}", trigger.name, reason);
                }
                Err(e) => {
                    // 校验失败时派发器已留下 FAILED 记录，这次触发照常计入
                    warn!(trigger_id = trigger.id, "触发器 {} 派发失败: {}", trigger.name, e);
                }
            }
            self.metrics
                .record_trigger_fire(is_misfired(scheduled, now, poll_interval));
        } else {
            warn!(
                trigger_id = trigger.id,
                scheduled = %scheduled,
                "触发器 {} 错过触发时间，按 DO_NOTHING 丢弃",
                trigger.name
            );
            self.metrics.record_misfire_skipped();
        }

        let update = fire_update(trigger, scheduled, now, action);
        let written = self
            .trigger_repo
            .complete_fire(trigger.id, &self.config.node_id, &update)
            .await?;
        if !written {
            warn!(
                trigger_id = trigger.id,
                "写回触发器状态时租约已不属于本节点，可能是处理时间超过了租约时长"
            );
        }
        if !update.enabled {
            info!(trigger_id = trigger.id, "触发器 {} 已没有后续触发，自动停用", trigger.name);
        }

        Ok(if action.fires() {
            TriggerOutcome::Fired
        } else {
            TriggerOutcome::MisfireSkipped
        })
    }

    async fn release(&self, trigger_id: i64) {
        if let Err(e) = self
            .trigger_repo
            .release_claim(trigger_id, &self.config.node_id)
            .await
        {
            warn!(trigger_id = trigger_id, "释放触发器租约失败: {}", e);
        }
    }

    /// 按固定间隔运行调度周期，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            node_id = %self.config.node_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "触发器调度循环启动"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        error!("触发器调度失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("触发器调度循环收到关闭信号");
                    break;
                }
            }
        }
    }
}

/// 计算本次触发之后要写回的簿记字段
///
/// 按计划触发时下一次从 `scheduled` 推进，积压的触发在之后的周期里逐个补上；
/// 其余动作从 `now` 重新对齐。
fn fire_update(
    trigger: &Trigger,
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    action: MisfireAction,
) -> TriggerFireUpdate {
    let (fire_count, last_fire_time) = if action.fires() {
        (trigger.fire_count + 1, Some(scheduled))
    } else {
        (trigger.fire_count, trigger.last_fire_time)
    };

    let reached_max = trigger
        .max_fire_count
        .is_some_and(|max| fire_count >= max);
    let next_fire_time = if reached_max {
        None
    } else {
        let from = match action {
            MisfireAction::FireAsScheduled => scheduled,
            MisfireAction::FireOnceNow | MisfireAction::SkipAndResync => now,
        };
        match compute_next_fire(trigger, from) {
            Ok(next) => next,
            Err(SchedulerError::NoFutureFireTime { .. }) => None,
            Err(e) => {
                error!(trigger_id = trigger.id, "计算下一次触发时间失败: {}", e);
                None
            }
        }
    };

    TriggerFireUpdate {
        last_fire_time,
        next_fire_time,
        fire_count,
        enabled: trigger.enabled && next_fire_time.is_some(),
    }
}
