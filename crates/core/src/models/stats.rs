use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{DefinitionStatus, ExecutionStatus};

/// 趋势分桶粒度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BucketSize {
    Hour,
    Day,
}

impl BucketSize {
    pub fn duration(&self) -> Duration {
        match self {
            BucketSize::Hour => Duration::hours(1),
            BucketSize::Day => Duration::days(1),
        }
    }
}

/// 统计查询
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket: BucketSize,
    pub top_n: usize,
    /// 只统计某个定义的执行
    pub job_definition_id: Option<i64>,
}

impl StatsQuery {
    /// 截至 `now` 的最近 `days` 天，按天分桶
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            from: now - Duration::days(days.max(1)),
            to: now,
            bucket: BucketSize::Day,
            top_n: 5,
            job_definition_id: None,
        }
    }
}

/// 统计用的定义摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinitionSummary {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub enabled: bool,
    pub status: DefinitionStatus,
}

/// 统计用的执行摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSummary {
    pub id: i64,
    pub job_definition_id: i64,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// 同一时刻读取的一致性快照
///
/// 存储层保证三部分来自同一个读视图，聚合只在快照上进行。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub definitions: Vec<DefinitionSummary>,
    /// 每个触发器的启用标志
    pub trigger_enabled: Vec<bool>,
    /// 窗口 `[from, to)` 内创建的执行
    pub executions: Vec<ExecutionSummary>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendBucket {
    pub start: DateTime<Utc>,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopDefinition {
    pub job_definition_id: i64,
    pub code: String,
    pub name: String,
    pub executions: u64,
}

/// 聚合后的统计结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStats {
    pub total_definitions: u64,
    pub enabled_definitions: u64,
    pub running_definitions: u64,
    pub failed_definitions: u64,
    pub total_executions: u64,
    pub queued_executions: u64,
    pub running_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    /// 成功率（百分比），没有执行时为 0
    pub success_rate: f64,
    /// 成功执行的平均耗时（毫秒）
    pub average_execution_ms: f64,
    pub definition_status_distribution: Vec<StatusCount>,
    pub trigger_status_distribution: Vec<StatusCount>,
    pub trend: Vec<TrendBucket>,
    pub top_definitions: Vec<TopDefinition>,
    pub generated_at: DateTime<Utc>,
}
