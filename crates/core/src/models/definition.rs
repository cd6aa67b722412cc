use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobParameters, LogLevel};

/// 作业定义状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DefinitionStatus {
    Unknown,
    Running,
    Finished,
    Failed,
    Cancelled,
    Paused,
}

text_enum!(DefinitionStatus {
    Unknown => "UNKNOWN",
    Running => "RUNNING",
    Finished => "FINISHED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
    Paused => "PAUSED",
});

pub const DEFAULT_MAX_RETRY_COUNT: i32 = 3;

/// 作业定义
///
/// 可被调度的工作单元，`code` 全局唯一。调度器只修改状态、结果和重试计数，
/// 其余字段由管理端维护。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// 注册表中的作业类型键
    pub job_type: String,
    pub enabled: bool,
    pub status: DefinitionStatus,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_end_time: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub retry_count: i32,
    pub max_retry_count: i32,
    pub parameters: JobParameters,
    pub log_level: LogLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    pub fn new(code: impl Into<String>, name: impl Into<String>, job_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            code: code.into(),
            name: name.into(),
            description: None,
            job_type: job_type.into(),
            enabled: true,
            status: DefinitionStatus::Unknown,
            last_start_time: None,
            last_end_time: None,
            last_result: None,
            retry_count: 0,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            parameters: JobParameters::default(),
            log_level: LogLevel::Info,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == DefinitionStatus::Running
    }

    /// 是否还允许自动重试
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retry_count
    }

    pub fn validate(&self) -> crate::SchedulerResult<()> {
        if self.code.trim().is_empty() {
            return Err(crate::SchedulerError::Validation(
                "作业编码不能为空".to_string(),
            ));
        }
        if self.job_type.trim().is_empty() {
            return Err(crate::SchedulerError::Validation(
                "作业类型不能为空".to_string(),
            ));
        }
        if self.max_retry_count < 0 {
            return Err(crate::SchedulerError::Validation(format!(
                "最大重试次数不能为负数: {}",
                self.max_retry_count
            )));
        }
        if self.retry_count < 0 || self.retry_count > self.max_retry_count {
            return Err(crate::SchedulerError::Validation(format!(
                "重试计数 {} 超出范围 [0, {}]",
                self.retry_count, self.max_retry_count
            )));
        }
        Ok(())
    }
}
