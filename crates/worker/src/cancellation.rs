use std::sync::Arc;

use tracing::{info, instrument};

use jobsched_core::{
    models::ExecutionStatus,
    traits::{ExecutionRepository, JobDefinitionRepository},
    JobRegistry, SchedulerError, SchedulerResult,
};

use crate::running::RunningExecutions;

/// 运行中执行的取消入口
///
/// 取消请求先持久化，再尝试直接通知本节点上的句柄；
/// 执行在其他节点上时由该节点的取消检查任务读取持久化标志。
pub struct CancellationCoordinator {
    definitions: Arc<dyn JobDefinitionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    registry: Arc<JobRegistry>,
    running: RunningExecutions,
}

impl CancellationCoordinator {
    pub fn new(
        definitions: Arc<dyn JobDefinitionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        registry: Arc<JobRegistry>,
        running: RunningExecutions,
    ) -> Self {
        Self {
            definitions,
            executions,
            registry,
            running,
        }
    }

    /// 请求取消一个运行中的执行
    ///
    /// 只登记请求，执行何时结束取决于作业何时检查取消标志。
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: i64) -> SchedulerResult<()> {
        let execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| SchedulerError::execution_not_found(execution_id))?;

        if execution.status != ExecutionStatus::Running {
            return Err(SchedulerError::InvalidStateTransition {
                from: execution.status.to_string(),
                to: ExecutionStatus::Cancelled.to_string(),
            });
        }

        let definition = self
            .definitions
            .get_by_id(execution.job_definition_id)
            .await?
            .ok_or_else(|| SchedulerError::definition_not_found(execution.job_definition_id))?;

        let abortable = match self.registry.get(&definition.job_type).await {
            Some(job) => job.is_abortable(),
            None => false,
        };
        if !abortable {
            return Err(SchedulerError::NotAbortable { execution_id });
        }

        if !self.executions.request_cancel(execution_id).await? {
            // 读取之后执行已经结束
            let current = self
                .executions
                .get_by_id(execution_id)
                .await?
                .map(|e| e.status)
                .unwrap_or(execution.status);
            return Err(SchedulerError::InvalidStateTransition {
                from: current.to_string(),
                to: ExecutionStatus::Cancelled.to_string(),
            });
        }

        let local = self.running.signal_cancel(execution_id).await;
        info!(
            "已请求取消执行 {} ({})",
            execution_id,
            if local { "本节点" } else { "等待执行节点检查" }
        );
        Ok(())
    }
}
