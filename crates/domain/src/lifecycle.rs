//! 执行生命周期状态机
//!
//! ```text
//! QUEUED ──> RUNNING ──> SUCCESS | FAILED | CANCELLED
//!    └────────────────> FAILED | CANCELLED
//! ```
//!
//! 终态不接受任何转换。每次转换产生一条日志条目，是否保留由执行的日志阈值决定。

use chrono::{DateTime, Utc};

use jobsched_core::{
    models::{Execution, ExecutionStatus, ExecutionTransition, LogEntry, LogLevel},
    SchedulerError, SchedulerResult,
};

/// 作业运行结束后的结果分类
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded { message: String },
    Failed { message: String, error: Option<String> },
    Cancelled { message: String },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Succeeded { .. } => ExecutionStatus::Success,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
            ExecutionOutcome::Cancelled { .. } => ExecutionStatus::Cancelled,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutionOutcome::Succeeded { message }
            | ExecutionOutcome::Failed { message, .. }
            | ExecutionOutcome::Cancelled { message } => message,
        }
    }

    /// 写入定义 `last_result` 的文本，例如 `SUCCESS: 已处理 10 条`
    pub fn summary(&self) -> String {
        format!("{}: {}", self.status(), self.message())
    }
}

pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (from, to),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn check(from: ExecutionStatus, to: ExecutionStatus) -> SchedulerResult<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// QUEUED -> RUNNING
    pub fn start(
        execution: &Execution,
        at: DateTime<Utc>,
    ) -> SchedulerResult<(ExecutionTransition, LogEntry)> {
        Self::check(execution.status, ExecutionStatus::Running)?;

        let transition = ExecutionTransition {
            execution_id: execution.id,
            from: execution.status,
            to: ExecutionStatus::Running,
            at,
            message: None,
            error: None,
        };
        let entry = LogEntry {
            timestamp: at,
            level: LogLevel::Info,
            message: format!(
                "开始执行 (第 {} 次尝试, 关联ID {})",
                execution.attempt, execution.correlation_id
            ),
        };
        Ok((transition, entry))
    }

    /// 进入终态
    pub fn finish(
        execution: &Execution,
        outcome: &ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> SchedulerResult<(ExecutionTransition, LogEntry)> {
        let to = outcome.status();
        Self::check(execution.status, to)?;

        let (level, text, error) = match outcome {
            ExecutionOutcome::Succeeded { message } => {
                (LogLevel::Info, format!("作业执行成功: {}", message), None)
            }
            ExecutionOutcome::Failed { message, error } => {
                let text = match error {
                    Some(error) => format!("作业执行失败: {} ({})", message, error),
                    None => format!("作业执行失败: {}", message),
                };
                (LogLevel::Error, text, error.clone())
            }
            ExecutionOutcome::Cancelled { message } => {
                (LogLevel::Warn, format!("作业已取消: {}", message), None)
            }
        };

        let transition = ExecutionTransition {
            execution_id: execution.id,
            from: execution.status,
            to,
            at,
            message: Some(outcome.message().to_string()),
            error,
        };
        let entry = LogEntry {
            timestamp: at,
            level,
            message: text,
        };
        Ok((transition, entry))
    }

    /// 只保留不低于执行日志阈值的条目
    pub fn retain_logs(execution: &Execution, entries: Vec<LogEntry>) -> Vec<LogEntry> {
        entries
            .into_iter()
            .filter(|entry| execution.log_level.admits(entry.level))
            .collect()
    }
}
