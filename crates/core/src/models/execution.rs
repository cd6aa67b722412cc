use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobDefinition, JobParameters, LogLevel};

/// 执行实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

text_enum!(ExecutionStatus {
    Queued => "QUEUED",
    Running => "RUNNING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// 执行的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOrigin {
    /// 触发器到期触发
    Scheduled { trigger_id: i64 },
    /// 管理端立即执行
    Manual,
    /// 失败后的自动重试，沿用上一次执行的关联ID
    Retry {
        previous_execution_id: i64,
        attempt: i32,
        correlation_id: String,
    },
}

impl ExecutionOrigin {
    /// 外部触发（定时或手动）会重置定义的重试计数
    pub fn resets_retry_count(&self) -> bool {
        !matches!(self, ExecutionOrigin::Retry { .. })
    }

    pub fn trigger_id(&self) -> Option<i64> {
        match self {
            ExecutionOrigin::Scheduled { trigger_id } => Some(*trigger_id),
            _ => None,
        }
    }

    pub fn attempt(&self) -> i32 {
        match self {
            ExecutionOrigin::Retry { attempt, .. } => *attempt,
            _ => 1,
        }
    }

    pub fn correlation_id(&self) -> String {
        match self {
            ExecutionOrigin::Scheduled { .. } => format!("SCHED-{}", uuid::Uuid::new_v4()),
            ExecutionOrigin::Manual => format!("MANUAL-{}", uuid::Uuid::new_v4()),
            ExecutionOrigin::Retry { correlation_id, .. } => correlation_id.clone(),
        }
    }
}

/// 作业的一次具体执行
///
/// 参数在创建时从定义复制为快照，之后定义的修改不会影响历史执行。
/// 日志条目单独追加存储，通过执行仓库读取。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: i64,
    pub job_definition_id: i64,
    pub trigger_id: Option<i64>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    pub correlation_id: String,
    pub node_id: Option<String>,
    pub parameters: JobParameters,
    pub log_level: LogLevel,
    pub result_message: Option<String>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// 基于定义创建排队中的执行实例
    pub fn queued(
        definition: &JobDefinition,
        origin: &ExecutionOrigin,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            job_definition_id: definition.id,
            trigger_id: origin.trigger_id(),
            status: ExecutionStatus::Queued,
            started_at: None,
            ended_at: None,
            attempt: origin.attempt(),
            correlation_id: origin.correlation_id(),
            node_id: Some(node_id.into()),
            parameters: definition.parameters.clone(),
            log_level: definition.log_level,
            result_message: None,
            error_message: None,
            cancel_requested: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some((ended - started).num_milliseconds()),
            _ => None,
        }
    }

    /// 把一次状态转换应用到内存中的实例上
    pub fn apply(&mut self, transition: &ExecutionTransition) {
        self.status = transition.to;
        if transition.to == ExecutionStatus::Running {
            self.started_at = Some(transition.at);
        }
        if transition.to.is_terminal() {
            self.ended_at = Some(transition.at);
            if transition.message.is_some() {
                self.result_message = transition.message.clone();
            }
            if transition.error.is_some() {
                self.error_message = transition.error.clone();
            }
        }
    }
}

/// 条件状态转换：仅当当前状态等于 `from` 时才会生效
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTransition {
    pub execution_id: i64,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub at: DateTime<Utc>,
    pub message: Option<String>,
    pub error: Option<String>,
}
