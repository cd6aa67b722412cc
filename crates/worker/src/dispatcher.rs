//! 执行派发器
//!
//! [`ExecutionDispatcher`] 实现 [`JobLauncher`]：在调用方的任务里完成校验并创建
//! 排队中的执行，随即返回；作业本身在受信号量限制的工作池中运行。
//!
//! 一次执行的处理顺序：
//! 1. 获取工作池许可，QUEUED -> RUNNING，定义标记为 RUNNING
//! 2. 启动日志写入任务，可中止作业额外启动取消检查任务
//! 3. 在独立任务中运行作业，panic 与 `Err` 都记为失败
//! 4. 日志写完后写入终态，结算定义，必要时放入重试队列
//!
//! 进入 RUNNING 之后终态必定落库：终态写入失败时重试，仍失败则改写为 FAILED。

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

use jobsched_core::{
    config::WorkerConfig,
    models::{
        DefinitionStatus, Execution, ExecutionOrigin, ExecutionTransition, JobDefinition,
        LogEntry,
    },
    traits::{
        DefinitionStateUpdate, ExecutionRepository, Job, JobDefinitionRepository, JobLauncher,
        JobResult, LaunchOutcome,
    },
    CancellationHandle, ExecutionLogger, JobContext, JobRegistry, SchedulerError,
    SchedulerResult,
};
use jobsched_domain::{settle_definition, ExecutionOutcome, ExecutionStateMachine, RetryDecision};
use jobsched_infrastructure::MetricsCollector;

use crate::retry::{RetryPolicy, RetryPump, RetryRequest};
use crate::running::RunningExecutions;

const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ExecutionDispatcherConfig {
    pub node_id: String,
    pub pool_size: usize,
    pub retry_queue_capacity: usize,
    pub cancel_check_interval: Duration,
    pub drain_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ExecutionDispatcherConfig {
    pub fn from_config(config: &WorkerConfig, node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            pool_size: config.pool_size,
            retry_queue_capacity: config.retry_queue_capacity,
            cancel_check_interval: config.cancel_check_interval(),
            drain_timeout: config.drain_timeout(),
            retry_policy: RetryPolicy::from_config(config),
        }
    }
}

struct Shared {
    config: ExecutionDispatcherConfig,
    definitions: Arc<dyn JobDefinitionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsCollector>,
    running: RunningExecutions,
    semaphore: Arc<Semaphore>,
    retry_tx: mpsc::Sender<RetryRequest>,
    shutting_down: AtomicBool,
}

pub struct ExecutionDispatcher {
    shared: Arc<Shared>,
}

impl ExecutionDispatcher {
    /// 创建派发器以及消费其重试请求的重试泵
    pub fn new(
        definitions: Arc<dyn JobDefinitionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsCollector>,
        config: ExecutionDispatcherConfig,
    ) -> (Arc<Self>, RetryPump) {
        let (retry_tx, retry_rx) = mpsc::channel(config.retry_queue_capacity.max(1));
        let retry_policy = config.retry_policy.clone();

        let dispatcher = Arc::new(Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(config.pool_size.max(1))),
                config,
                definitions,
                executions,
                registry,
                metrics,
                running: RunningExecutions::new(),
                retry_tx,
                shutting_down: AtomicBool::new(false),
            }),
        });

        let pump = RetryPump::new(retry_rx, dispatcher.clone(), retry_policy);
        (dispatcher, pump)
    }

    pub fn node_id(&self) -> &str {
        &self.shared.config.node_id
    }

    /// 与取消协调器共享的运行中执行表
    pub fn running(&self) -> RunningExecutions {
        self.shared.running.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.shared.running.len().await
    }

    /// 停止接收新的执行并等待工作池排空
    ///
    /// 在超时时间内全部结束返回 `true`。
    pub async fn shutdown(&self) -> bool {
        self.shared.shutting_down.store(true, Ordering::Release);
        let permits = self.shared.config.pool_size.max(1) as u32;
        info!("等待运行中的作业结束");

        let drained = tokio::time::timeout(
            self.shared.config.drain_timeout,
            self.shared.semaphore.acquire_many(permits),
        )
        .await;

        match drained {
            Ok(Ok(_permits)) => {
                self.shared.semaphore.close();
                info!("工作池已排空");
                true
            }
            Ok(Err(_)) => true,
            Err(_) => {
                warn!(
                    "等待超时，仍有 {} 个作业在运行",
                    self.shared.running.len().await
                );
                self.shared.semaphore.close();
                false
            }
        }
    }
}

#[async_trait]
impl JobLauncher for ExecutionDispatcher {
    #[instrument(skip(self, origin), fields(node_id = %self.shared.config.node_id))]
    async fn launch(
        &self,
        job_definition_id: i64,
        origin: ExecutionOrigin,
    ) -> SchedulerResult<LaunchOutcome> {
        let shared = &self.shared;
        if shared.shutting_down.load(Ordering::Acquire) {
            return Ok(LaunchOutcome::Skipped {
                reason: "节点正在关闭".to_string(),
            });
        }

        let mut definition = shared
            .definitions
            .get_by_id(job_definition_id)
            .await?
            .ok_or_else(|| SchedulerError::definition_not_found(job_definition_id))?;

        if !definition.enabled {
            return Ok(LaunchOutcome::Skipped {
                reason: format!("作业定义 {} 已禁用", definition.code),
            });
        }

        let active = shared
            .executions
            .find_active_by_definition(job_definition_id)
            .await?;
        if let Some(active) = active.first() {
            debug!("作业 {} 已有执行 {} 在运行，跳过", definition.code, active.id);
            return Ok(LaunchOutcome::Skipped {
                reason: format!("作业定义 {} 已有执行 {} 在运行", definition.code, active.id),
            });
        }

        if origin.resets_retry_count() && definition.retry_count != 0 {
            shared
                .definitions
                .update_state(
                    definition.id,
                    &DefinitionStateUpdate {
                        retry_count: Some(0),
                        ..Default::default()
                    },
                )
                .await?;
            definition.retry_count = 0;
        }

        let job = match shared.registry.get(&definition.job_type).await {
            Some(job) => job,
            None => {
                let reason = format!("未注册的作业类型: {}", definition.job_type);
                return shared.reject(&definition, &origin, reason).await;
            }
        };

        if !job.validate(&definition) {
            let errors = job.validation_errors(&definition);
            let reason = if errors.is_empty() {
                "作业校验未通过".to_string()
            } else {
                errors.join("; ")
            };
            return shared.reject(&definition, &origin, reason).await;
        }

        let execution = shared
            .executions
            .create(&Execution::queued(
                &definition,
                &origin,
                shared.config.node_id.clone(),
            ))
            .await?;
        let execution_id = execution.id;
        info!(
            definition_id = definition.id,
            execution_id = execution_id,
            attempt = execution.attempt,
            correlation_id = %execution.correlation_id,
            "作业 {} 已进入执行队列",
            definition.code
        );

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = shared.run(job, definition, execution).await {
                error!(execution_id = execution_id, "执行 {} 处理失败: {}", execution_id, e);
            }
        });

        Ok(LaunchOutcome::Accepted { execution_id })
    }
}

impl Shared {
    /// 校验失败：留下一条 FAILED 执行记录后返回 `Validation`
    async fn reject(
        &self,
        definition: &JobDefinition,
        origin: &ExecutionOrigin,
        reason: String,
    ) -> SchedulerResult<LaunchOutcome> {
        warn!(definition_id = definition.id, "作业 {} 校验失败: {}", definition.code, reason);
        self.metrics.record_validation_failure();

        let execution = self
            .executions
            .create(&Execution::queued(definition, origin, self.config.node_id.clone()))
            .await?;

        let now = Utc::now();
        let outcome = ExecutionOutcome::Failed {
            message: "作业校验失败".to_string(),
            error: Some(reason.clone()),
        };
        let (transition, entry) = ExecutionStateMachine::finish(&execution, &outcome, now)?;
        self.executions.transition(&transition).await?;
        let logs = ExecutionStateMachine::retain_logs(&execution, vec![entry]);
        self.executions.append_logs(execution.id, &logs).await?;

        self.definitions
            .update_state(
                definition.id,
                &DefinitionStateUpdate {
                    status: Some(DefinitionStatus::Failed),
                    last_end_time: Some(now),
                    last_result: Some(format!("FAILED: {}", reason)),
                    ..Default::default()
                },
            )
            .await?;

        Err(SchedulerError::Validation(reason))
    }

    async fn run(
        self: Arc<Self>,
        job: Arc<dyn Job>,
        definition: JobDefinition,
        mut execution: Execution,
    ) -> SchedulerResult<()> {
        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(execution_id = execution.id, "工作池已关闭，执行保持排队状态");
                return Ok(());
            }
        };

        let started_at = Utc::now();
        let (transition, start_entry) = ExecutionStateMachine::start(&execution, started_at)?;
        if !self.executions.transition(&transition).await? {
            warn!(execution_id = execution.id, "执行 {} 已不处于排队状态，放弃运行", execution.id);
            return Ok(());
        }
        execution.apply(&transition);
        if let Err(e) = self
            .definitions
            .update_state(
                definition.id,
                &DefinitionStateUpdate {
                    status: Some(DefinitionStatus::Running),
                    last_start_time: Some(started_at),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(
                definition_id = definition.id,
                "作业 {} 标记为运行中失败: {}", definition.code, e
            );
        }
        self.metrics.execution_started();

        let (logger, log_rx) = ExecutionLogger::channel(execution.log_level);
        let writer = tokio::spawn(write_logs(
            Arc::clone(&self.executions),
            execution.id,
            log_rx,
        ));
        logger.log(start_entry.level, start_entry.message);

        let cancellation = job.is_abortable().then(CancellationHandle::new);
        self.running.insert(execution.id, cancellation.clone()).await;
        let watcher = cancellation.clone().map(|handle| {
            tokio::spawn(watch_cancel(
                Arc::clone(&self.executions),
                execution.id,
                handle,
                self.config.cancel_check_interval,
            ))
        });

        let mut context = JobContext::new(
            execution.id,
            definition.id,
            execution.correlation_id.clone(),
            execution.attempt,
            self.config.node_id.clone(),
            execution.parameters.clone(),
            logger.clone(),
        );
        if let Some(handle) = &cancellation {
            context = context.with_cancellation(handle.clone());
        }
        let mut snapshot = definition.clone();
        snapshot.parameters = execution.parameters.clone();

        let clock = Instant::now();
        let result = tokio::spawn(async move { job.execute(&snapshot, &context).await }).await;
        let elapsed = clock.elapsed();

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.running.remove(execution.id).await;

        let outcome = classify(result, cancellation.as_ref());
        let ended_at = Utc::now();
        let finished = ExecutionStateMachine::finish(&execution, &outcome, ended_at);
        if let Ok((_, finish_entry)) = &finished {
            logger.log(finish_entry.level, finish_entry.message.clone());
        }
        drop(logger);
        if let Err(e) = writer.await {
            warn!(execution_id = execution.id, "日志写入任务异常退出: {}", e);
        }

        let persisted = match finished {
            Ok((transition, _)) => self.persist_terminal(&execution, outcome, transition).await,
            Err(e) => Err(e),
        };
        self.metrics.execution_ended();
        let outcome = match persisted {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                warn!(
                    execution_id = execution.id,
                    "执行 {} 的状态已被其他流程修改，不再结算",
                    execution.id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.metrics
            .record_execution_finished(outcome.status(), elapsed.as_secs_f64());
        info!(
            execution_id = execution.id,
            status = %outcome.status(),
            duration_ms = elapsed.as_millis() as u64,
            "执行 {} 结束",
            execution.id
        );

        self.settle(&execution, &outcome, ended_at).await
    }

    /// 写入终态，返回实际落库的结果；`None` 表示状态已被其他流程修改
    ///
    /// 连续写入失败后改写为 FAILED，保证执行不会停留在 RUNNING。
    async fn persist_terminal(
        &self,
        execution: &Execution,
        outcome: ExecutionOutcome,
        transition: ExecutionTransition,
    ) -> SchedulerResult<Option<ExecutionOutcome>> {
        let mut last_error = None;
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self.executions.transition(&transition).await {
                Ok(true) => return Ok(Some(outcome)),
                Ok(false) => return Ok(None),
                Err(e) => {
                    warn!(
                        execution_id = execution.id,
                        "写入执行 {} 终态失败 ({}/{}): {}",
                        execution.id,
                        attempt,
                        TERMINAL_WRITE_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < TERMINAL_WRITE_ATTEMPTS {
                tokio::time::sleep(TERMINAL_WRITE_BACKOFF).await;
            }
        }

        let error = last_error.map(|e| e.to_string());
        error!(
            execution_id = execution.id,
            "执行 {} 的终态无法写入，改写为失败", execution.id
        );
        let fallback = ExecutionOutcome::Failed {
            message: "写入执行结果失败".to_string(),
            error,
        };
        let (transition, entry) = ExecutionStateMachine::finish(execution, &fallback, Utc::now())?;
        if !self.executions.transition(&transition).await? {
            return Ok(None);
        }
        let logs = ExecutionStateMachine::retain_logs(execution, vec![entry]);
        if let Err(e) = self.executions.append_logs(execution.id, &logs).await {
            warn!(execution_id = execution.id, "写入执行日志失败: {}", e);
        }
        Ok(Some(fallback))
    }

    async fn settle(
        &self,
        execution: &Execution,
        outcome: &ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let Some(definition) = self
            .definitions
            .get_by_id(execution.job_definition_id)
            .await?
        else {
            warn!("执行 {} 所属的作业定义已被删除", execution.id);
            return Ok(());
        };

        let settlement = settle_definition(&definition, outcome, execution.attempt, at);
        self.definitions
            .update_state(definition.id, &settlement.update)
            .await?;

        match settlement.retry {
            RetryDecision::Retry { next_attempt } => {
                self.metrics.record_retry();
                info!(
                    definition_id = definition.id,
                    attempt = next_attempt,
                    "作业 {} 失败，第 {}/{} 次重试",
                    definition.code,
                    definition.retry_count + 1,
                    definition.max_retry_count
                );
                let request = RetryRequest {
                    job_definition_id: definition.id,
                    previous_execution_id: execution.id,
                    attempt: next_attempt,
                    correlation_id: execution.correlation_id.clone(),
                };
                if self.retry_tx.send(request).await.is_err() {
                    warn!("重试队列已关闭，放弃重试作业 {}", definition.code);
                }
            }
            RetryDecision::Exhausted => {
                warn!(
                    definition_id = definition.id,
                    "作业 {} 失败且重试次数已用尽 ({}/{})",
                    definition.code,
                    definition.retry_count,
                    definition.max_retry_count
                );
            }
            RetryDecision::NotNeeded => {}
        }
        Ok(())
    }
}

/// 单个执行的日志写入任务，按接收顺序批量追加
async fn write_logs(
    executions: Arc<dyn ExecutionRepository>,
    execution_id: i64,
    mut rx: mpsc::UnboundedReceiver<LogEntry>,
) {
    while let Some(entry) = rx.recv().await {
        let mut batch = vec![entry];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }
        if let Err(e) = executions.append_logs(execution_id, &batch).await {
            warn!(execution_id = execution_id, "写入执行日志失败: {}", e);
        }
    }
}

/// 周期检查持久化的取消请求，其他节点发出的取消由此传到本地标志
async fn watch_cancel(
    executions: Arc<dyn ExecutionRepository>,
    execution_id: i64,
    handle: CancellationHandle,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if handle.is_requested() {
            break;
        }
        match executions.is_cancel_requested(execution_id).await {
            Ok(true) => {
                info!(execution_id = execution_id, "执行 {} 收到取消请求", execution_id);
                handle.request();
                break;
            }
            Ok(false) => {}
            Err(e) => warn!(execution_id = execution_id, "检查取消请求失败: {}", e),
        }
    }
}

fn classify(
    result: Result<SchedulerResult<JobResult>, JoinError>,
    cancellation: Option<&CancellationHandle>,
) -> ExecutionOutcome {
    let outcome = match result {
        Ok(Ok(result)) if result.success => ExecutionOutcome::Succeeded {
            message: result.message,
        },
        Ok(Ok(result)) => ExecutionOutcome::Failed {
            message: result.message,
            error: result.error,
        },
        Ok(Err(e)) => ExecutionOutcome::Failed {
            message: "作业返回错误".to_string(),
            error: Some(e.to_string()),
        },
        Err(e) if e.is_panic() => ExecutionOutcome::Failed {
            message: "作业执行时发生panic".to_string(),
            error: Some(panic_message(e.into_panic())),
        },
        Err(e) => ExecutionOutcome::Failed {
            message: "作业任务被中止".to_string(),
            error: Some(e.to_string()),
        },
    };

    if cancellation.is_some_and(|handle| handle.was_observed()) {
        let message = match &outcome {
            ExecutionOutcome::Succeeded { message } => message.clone(),
            _ => "作业已响应取消请求".to_string(),
        };
        return ExecutionOutcome::Cancelled { message };
    }
    outcome
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知的panic".to_string()
    }
}
