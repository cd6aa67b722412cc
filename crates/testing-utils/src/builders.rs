//! 测试数据构建器

use chrono::{DateTime, Utc};
use jobsched_core::models::{
    DefinitionStatus, Execution, ExecutionStatus, JobDefinition, JobParameters, LogLevel,
    MisfirePolicy, Trigger,
};

/// 构建测试用 `JobDefinition`
pub struct JobDefinitionBuilder {
    definition: JobDefinition,
}

impl JobDefinitionBuilder {
    pub fn new() -> Self {
        let mut definition = JobDefinition::new("TEST_JOB", "测试作业", "succeeding");
        definition.id = 1;
        Self { definition }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.definition.id = id;
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.definition.code = code.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.definition.job_type = job_type.to_string();
        self
    }

    pub fn with_status(mut self, status: DefinitionStatus) -> Self {
        self.definition.status = status;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.definition.retry_count = retry_count;
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: i32) -> Self {
        self.definition.max_retry_count = max_retry_count;
        self
    }

    pub fn with_parameters(mut self, parameters: JobParameters) -> Self {
        self.definition.parameters = parameters;
        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.definition.log_level = log_level;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.definition.enabled = enabled;
        self
    }

    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    pub fn build(self) -> JobDefinition {
        self.definition
    }
}

impl Default for JobDefinitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建测试用 `Trigger`
pub struct TriggerBuilder {
    trigger: Trigger,
}

impl TriggerBuilder {
    pub fn new() -> Self {
        let mut trigger = Trigger::new(1, "test_trigger", "0 * * * * ?");
        trigger.id = 1;
        Self { trigger }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.trigger.id = id;
        self
    }

    pub fn with_definition_id(mut self, job_definition_id: i64) -> Self {
        self.trigger.job_definition_id = job_definition_id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.trigger.name = name.to_string();
        self
    }

    pub fn with_cron(mut self, cron_expression: &str) -> Self {
        self.trigger.cron_expression = cron_expression.to_string();
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.trigger.timezone = timezone.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.trigger.priority = priority;
        self
    }

    pub fn with_misfire_policy(mut self, policy: MisfirePolicy) -> Self {
        self.trigger.misfire_policy = policy;
        self
    }

    pub fn with_next_fire_time(mut self, at: DateTime<Utc>) -> Self {
        self.trigger.next_fire_time = Some(at);
        self
    }

    pub fn with_window(
        mut self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.trigger.start_time = start_time;
        self.trigger.end_time = end_time;
        self
    }

    pub fn with_fire_count(mut self, fire_count: i64) -> Self {
        self.trigger.fire_count = fire_count;
        self
    }

    pub fn with_max_fire_count(mut self, max_fire_count: i64) -> Self {
        self.trigger.max_fire_count = Some(max_fire_count);
        self
    }

    pub fn with_claim(mut self, owner: &str, expiry: DateTime<Utc>) -> Self {
        self.trigger.claim_owner = Some(owner.to_string());
        self.trigger.claim_expiry = Some(expiry);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.trigger.enabled = false;
        self
    }

    pub fn build(self) -> Trigger {
        self.trigger
    }
}

impl Default for TriggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建测试用 `Execution`
pub struct ExecutionBuilder {
    execution: Execution,
}

impl ExecutionBuilder {
    pub fn new() -> Self {
        Self {
            execution: Execution {
                id: 1,
                job_definition_id: 1,
                trigger_id: None,
                status: ExecutionStatus::Queued,
                started_at: None,
                ended_at: None,
                attempt: 1,
                correlation_id: "MANUAL-test".to_string(),
                node_id: Some("test-node".to_string()),
                parameters: JobParameters::new(),
                log_level: LogLevel::Info,
                result_message: None,
                error_message: None,
                cancel_requested: false,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.execution.id = id;
        self
    }

    pub fn with_definition_id(mut self, job_definition_id: i64) -> Self {
        self.execution.job_definition_id = job_definition_id;
        self
    }

    pub fn with_trigger_id(mut self, trigger_id: i64) -> Self {
        self.execution.trigger_id = Some(trigger_id);
        self
    }

    /// 设置状态，并补齐与之相符的开始/结束时间
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        let now = Utc::now();
        self.execution.status = status;
        if status != ExecutionStatus::Queued && self.execution.started_at.is_none() {
            self.execution.started_at = Some(now);
        }
        if status.is_terminal() && self.execution.ended_at.is_none() {
            self.execution.ended_at = Some(now);
        }
        self
    }

    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.execution.attempt = attempt;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.execution.correlation_id = correlation_id.to_string();
        self
    }

    pub fn with_node_id(mut self, node_id: &str) -> Self {
        self.execution.node_id = Some(node_id.to_string());
        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.execution.log_level = log_level;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.execution.created_at = created_at;
        self
    }

    pub fn with_times(mut self, started_at: DateTime<Utc>, ended_at: Option<DateTime<Utc>>) -> Self {
        self.execution.started_at = Some(started_at);
        self.execution.ended_at = ended_at;
        self
    }

    pub fn build(self) -> Execution {
        self.execution
    }
}

impl Default for ExecutionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
