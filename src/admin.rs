//! 管理服务
//!
//! 作业定义、触发器和执行的增删改查，以及立即执行、取消和统计查询。
//! REST 层只需要把请求反序列化为这里的请求类型并转发。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use jobsched_core::{
    models::{
        parameters::apply_defaults, Execution, ExecutionFilter, ExecutionOrigin, ExecutionStats,
        JobDefinition, JobParameters, LogEntry, LogLevel, MisfirePolicy, Page, PageRequest,
        StatsQuery, Trigger,
    },
    traits::{JobLauncher, LaunchOutcome},
    JobRegistry, JobTypeInfo, SchedulerError, SchedulerResult,
};
use jobsched_dispatcher::{compute_next_fire, parse_timezone, CronExpression};
use jobsched_domain::StatsAggregator;
use jobsched_infrastructure::Repositories;
use jobsched_worker::CancellationCoordinator;

/// 创建作业定义请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDefinitionRequest {
    pub code: String,
    pub name: String,
    pub job_type: String,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub max_retry_count: Option<i32>,
    #[serde(default)]
    pub parameters: JobParameters,
    pub log_level: Option<LogLevel>,
}

/// 更新作业定义请求，未设置的字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDefinitionRequest {
    pub code: Option<String>,
    pub name: Option<String>,
    pub job_type: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub max_retry_count: Option<i32>,
    pub parameters: Option<JobParameters>,
    pub log_level: Option<LogLevel>,
}

/// 删除作业定义的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteOutcome {
    Deleted,
    /// 仍有执行记录引用，只做了停用
    Deactivated,
}

/// 创建触发器请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTriggerRequest {
    pub job_definition_id: i64,
    pub name: String,
    pub cron_expression: String,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub priority: Option<i32>,
    pub misfire_policy: Option<MisfirePolicy>,
    pub max_fire_count: Option<i64>,
}

impl CreateTriggerRequest {
    pub fn new(
        job_definition_id: i64,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            job_definition_id,
            name: name.into(),
            cron_expression: cron_expression.into(),
            description: None,
            enabled: None,
            start_time: None,
            end_time: None,
            timezone: None,
            priority: None,
            misfire_policy: None,
            max_fire_count: None,
        }
    }
}

/// 更新触发器请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTriggerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub priority: Option<i32>,
    pub misfire_policy: Option<MisfirePolicy>,
    pub max_fire_count: Option<i64>,
}

pub struct AdminService {
    repos: Repositories,
    registry: Arc<JobRegistry>,
    launcher: Arc<dyn JobLauncher>,
    cancellation: Arc<CancellationCoordinator>,
}

impl AdminService {
    pub fn new(
        repos: Repositories,
        registry: Arc<JobRegistry>,
        launcher: Arc<dyn JobLauncher>,
        cancellation: Arc<CancellationCoordinator>,
    ) -> Self {
        Self {
            repos,
            registry,
            launcher,
            cancellation,
        }
    }

    // ---- 作业定义 ----

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_definition(
        &self,
        request: CreateDefinitionRequest,
    ) -> SchedulerResult<JobDefinition> {
        let mut definition = JobDefinition::new(request.code, request.name, request.job_type);
        definition.description = request.description;
        definition.enabled = request.enabled.unwrap_or(true);
        if let Some(max_retry_count) = request.max_retry_count {
            definition.max_retry_count = max_retry_count;
        }
        definition.parameters = request.parameters;
        if let Some(log_level) = request.log_level {
            definition.log_level = log_level;
        }
        definition.validate()?;

        match self.registry.get(&definition.job_type).await {
            Some(job) => apply_defaults(&job.parameters(), &mut definition.parameters),
            None => warn!("作业类型 {} 尚未注册，派发时将失败", definition.job_type),
        }

        let created = self.repos.definitions.create(&definition).await?;
        info!("创建作业定义: {} (ID: {})", created.code, created.id);
        Ok(created)
    }

    pub async fn update_definition(
        &self,
        id: i64,
        request: UpdateDefinitionRequest,
    ) -> SchedulerResult<JobDefinition> {
        let mut definition = self.get_definition(id).await?;
        if let Some(code) = request.code {
            definition.code = code;
        }
        if let Some(name) = request.name {
            definition.name = name;
        }
        if let Some(job_type) = request.job_type {
            definition.job_type = job_type;
        }
        if request.description.is_some() {
            definition.description = request.description;
        }
        if let Some(enabled) = request.enabled {
            definition.enabled = enabled;
        }
        if let Some(max_retry_count) = request.max_retry_count {
            definition.max_retry_count = max_retry_count;
            definition.retry_count = definition.retry_count.min(max_retry_count);
        }
        if let Some(parameters) = request.parameters {
            definition.parameters = parameters;
        }
        if let Some(log_level) = request.log_level {
            definition.log_level = log_level;
        }
        definition.validate()?;

        self.repos.definitions.update(&definition).await
    }

    /// 删除作业定义
    ///
    /// 还有执行记录引用时只停用定义，触发器保留但不再到期。
    pub async fn delete_definition(&self, id: i64) -> SchedulerResult<DeleteOutcome> {
        let mut definition = self.get_definition(id).await?;

        if self.repos.executions.count_by_definition(id).await? > 0 {
            if definition.enabled {
                definition.enabled = false;
                self.repos.definitions.update(&definition).await?;
            }
            info!("作业定义 {} 仍有执行记录，已停用", definition.code);
            return Ok(DeleteOutcome::Deactivated);
        }

        self.repos.triggers.delete_by_definition(id).await?;
        self.repos.definitions.delete(id).await?;
        info!("删除作业定义: {}", definition.code);
        Ok(DeleteOutcome::Deleted)
    }

    pub async fn get_definition(&self, id: i64) -> SchedulerResult<JobDefinition> {
        self.repos
            .definitions
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::definition_not_found(id))
    }

    pub async fn list_definitions(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let mut definitions = self.repos.definitions.list().await?;
        definitions.sort_by_key(|d| d.id);
        Ok(definitions)
    }

    // ---- 触发器 ----

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_trigger(&self, request: CreateTriggerRequest) -> SchedulerResult<Trigger> {
        self.get_definition(request.job_definition_id).await?;
        let mut trigger = Trigger::new(
            request.job_definition_id,
            request.name,
            request.cron_expression,
        );
        trigger.description = request.description;
        trigger.enabled = request.enabled.unwrap_or(true);
        trigger.start_time = request.start_time;
        trigger.end_time = request.end_time;
        if let Some(timezone) = request.timezone {
            trigger.timezone = timezone;
        }
        if let Some(priority) = request.priority {
            trigger.priority = priority;
        }
        if let Some(policy) = request.misfire_policy {
            trigger.misfire_policy = policy;
        }
        trigger.max_fire_count = request.max_fire_count;

        Self::check_trigger(&trigger)?;
        self.schedule(&mut trigger, Utc::now())?;

        let created = self.repos.triggers.create(&trigger).await?;
        info!(
            "创建触发器: {} (ID: {})，下次触发 {:?}",
            created.name, created.id, created.next_fire_time
        );
        Ok(created)
    }

    /// 更新触发器；调度相关字段变化时重新计算下次触发时间，旧租约总会被清除
    pub async fn update_trigger(
        &self,
        id: i64,
        request: UpdateTriggerRequest,
    ) -> SchedulerResult<Trigger> {
        let mut trigger = self.get_trigger(id).await?;
        let mut reschedule = false;

        if let Some(name) = request.name {
            trigger.name = name;
        }
        if request.description.is_some() {
            trigger.description = request.description;
        }
        if let Some(cron_expression) = request.cron_expression {
            reschedule |= cron_expression != trigger.cron_expression;
            trigger.cron_expression = cron_expression;
        }
        if let Some(enabled) = request.enabled {
            reschedule |= enabled && !trigger.enabled;
            trigger.enabled = enabled;
        }
        if request.start_time.is_some() {
            reschedule |= request.start_time != trigger.start_time;
            trigger.start_time = request.start_time;
        }
        if request.end_time.is_some() {
            reschedule |= request.end_time != trigger.end_time;
            trigger.end_time = request.end_time;
        }
        if let Some(timezone) = request.timezone {
            reschedule |= timezone != trigger.timezone;
            trigger.timezone = timezone;
        }
        if let Some(priority) = request.priority {
            trigger.priority = priority;
        }
        if let Some(policy) = request.misfire_policy {
            trigger.misfire_policy = policy;
        }
        if request.max_fire_count.is_some() {
            trigger.max_fire_count = request.max_fire_count;
        }

        Self::check_trigger(&trigger)?;
        if reschedule || (trigger.enabled && trigger.next_fire_time.is_none()) {
            self.schedule(&mut trigger, Utc::now())?;
        }

        self.repos.triggers.update(&trigger).await
    }

    pub async fn delete_trigger(&self, id: i64) -> SchedulerResult<()> {
        if !self.repos.triggers.delete(id).await? {
            return Err(SchedulerError::trigger_not_found(id));
        }
        info!("删除触发器: {}", id);
        Ok(())
    }

    pub async fn get_trigger(&self, id: i64) -> SchedulerResult<Trigger> {
        self.repos
            .triggers
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::trigger_not_found(id))
    }

    pub async fn list_triggers(&self, job_definition_id: Option<i64>) -> SchedulerResult<Vec<Trigger>> {
        match job_definition_id {
            Some(id) => self.repos.triggers.list_by_definition(id).await,
            None => self.repos.triggers.list().await,
        }
    }

    fn check_trigger(trigger: &Trigger) -> SchedulerResult<()> {
        if trigger.name.trim().is_empty() {
            return Err(SchedulerError::Validation("触发器名称不能为空".to_string()));
        }
        CronExpression::parse(&trigger.cron_expression)?;
        parse_timezone(&trigger.timezone)?;
        if let (Some(start), Some(end)) = (trigger.start_time, trigger.end_time) {
            if end <= start {
                return Err(SchedulerError::Validation(format!(
                    "结束时间 {} 必须晚于开始时间 {}",
                    end, start
                )));
            }
        }
        if trigger.max_fire_count.is_some_and(|max| max <= 0) {
            return Err(SchedulerError::Validation(
                "最大触发次数必须大于0".to_string(),
            ));
        }
        Ok(())
    }

    /// 计算初始的下次触发时间，窗口已关闭或达到触发上限时停用
    fn schedule(&self, trigger: &mut Trigger, now: DateTime<Utc>) -> SchedulerResult<()> {
        if !trigger.enabled {
            trigger.next_fire_time = None;
            return Ok(());
        }
        if trigger.reached_max_fire_count() {
            trigger.enabled = false;
            trigger.next_fire_time = None;
            return Ok(());
        }

        let next = match compute_next_fire(trigger, now) {
            Ok(next) => next,
            Err(SchedulerError::NoFutureFireTime { .. }) => None,
            Err(e) => return Err(e),
        };
        trigger.next_fire_time = next;
        if next.is_none() {
            warn!("触发器 {} 已没有后续触发时间，创建为停用状态", trigger.name);
            trigger.enabled = false;
        }
        Ok(())
    }

    // ---- 执行 ----

    /// 立即执行一次，返回已接受的执行ID
    ///
    /// 作业本身的失败只记录在执行上，不会返回给调用方。
    pub async fn run_now(&self, job_definition_id: i64) -> SchedulerResult<i64> {
        match self
            .launcher
            .launch(job_definition_id, ExecutionOrigin::Manual)
            .await?
        {
            LaunchOutcome::Accepted { execution_id } => Ok(execution_id),
            LaunchOutcome::Skipped { reason } => Err(SchedulerError::Conflict(reason)),
        }
    }

    pub async fn cancel_execution(&self, execution_id: i64) -> SchedulerResult<()> {
        self.cancellation.cancel(execution_id).await
    }

    pub async fn get_execution(&self, id: i64) -> SchedulerResult<Execution> {
        self.repos
            .executions
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::execution_not_found(id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> SchedulerResult<Page<Execution>> {
        self.repos.executions.list(filter, page).await
    }

    pub async fn execution_logs(&self, execution_id: i64) -> SchedulerResult<Vec<LogEntry>> {
        // 区分不存在的执行和还没有日志的执行
        self.get_execution(execution_id).await?;
        self.repos.executions.get_logs(execution_id).await
    }

    // ---- 统计与目录 ----

    pub async fn stats(&self, query: &StatsQuery) -> SchedulerResult<ExecutionStats> {
        if query.to <= query.from {
            return Err(SchedulerError::Validation(
                "统计窗口的结束时间必须晚于开始时间".to_string(),
            ));
        }
        let snapshot = self.repos.stats.snapshot(query).await?;
        Ok(StatsAggregator::aggregate(&snapshot, query))
    }

    pub async fn job_types(&self) -> Vec<JobTypeInfo> {
        self.registry.catalogue().await
    }
}
