use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{models::ExecutionOrigin, SchedulerResult};

/// 派发请求的受理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchOutcome {
    /// 已创建排队中的执行，作业将在工作池中异步运行
    Accepted { execution_id: i64 },
    /// 本次不执行，例如定义已禁用或已有执行在运行
    Skipped { reason: String },
}

impl LaunchOutcome {
    pub fn execution_id(&self) -> Option<i64> {
        match self {
            LaunchOutcome::Accepted { execution_id } => Some(*execution_id),
            LaunchOutcome::Skipped { .. } => None,
        }
    }
}

/// 触发器调度循环与执行派发器之间的接口
///
/// 实现必须在作业真正运行之前返回，调度循环不会等待作业完成。
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// 为作业定义派发一次执行
    ///
    /// # 错误
    ///
    /// * `SchedulerError::NotFound` - 定义不存在
    /// * `SchedulerError::Validation` - 作业校验失败，此时已留下一条 FAILED 执行记录
    async fn launch(
        &self,
        job_definition_id: i64,
        origin: ExecutionOrigin,
    ) -> SchedulerResult<LaunchOutcome>;
}
