//! 执行结束后对作业定义的结算：状态、最近结果以及是否自动重试。

use chrono::{DateTime, Utc};

use jobsched_core::{
    models::{DefinitionStatus, JobDefinition},
    traits::DefinitionStateUpdate,
};

use crate::lifecycle::ExecutionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 不需要重试（成功或已取消）
    NotNeeded,
    /// 入队一次新的执行
    Retry { next_attempt: i32 },
    /// 重试次数已用尽，定义停在 FAILED
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub update: DefinitionStateUpdate,
    pub retry: RetryDecision,
}

/// 根据执行结果计算定义的新状态和重试决定
///
/// 失败且 `retry_count < max_retry_count` 时重试计数加一并要求重试；
/// 计数达到上限后不再重试，直到外部触发把计数重置为 0。
pub fn settle_definition(
    definition: &JobDefinition,
    outcome: &ExecutionOutcome,
    attempt: i32,
    at: DateTime<Utc>,
) -> Settlement {
    let mut update = DefinitionStateUpdate {
        last_end_time: Some(at),
        last_result: Some(outcome.summary()),
        ..Default::default()
    };

    let retry = match outcome {
        ExecutionOutcome::Succeeded { .. } => {
            update.status = Some(DefinitionStatus::Finished);
            RetryDecision::NotNeeded
        }
        ExecutionOutcome::Cancelled { .. } => {
            update.status = Some(DefinitionStatus::Cancelled);
            RetryDecision::NotNeeded
        }
        ExecutionOutcome::Failed { .. } => {
            update.status = Some(DefinitionStatus::Failed);
            if definition.can_retry() {
                update.retry_count = Some(definition.retry_count + 1);
                RetryDecision::Retry {
                    next_attempt: attempt + 1,
                }
            } else {
                RetryDecision::Exhausted
            }
        }
    };

    Settlement { update, retry }
}
