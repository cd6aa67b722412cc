//! 启动时的孤儿执行清理
//!
//! 进程崩溃后数据库中会残留 QUEUED/RUNNING 的执行，它们不会再有任何节点推进。
//! 清理范围：没有节点归属的、属于本节点的（上一次运行留下）、
//! 以及所属节点心跳已超时的执行。必须在派发器开始接收执行之前调用。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use jobsched_core::{
    models::{DefinitionStatus, Execution, ExecutionStatus},
    traits::{DefinitionStateUpdate, ExecutionRepository, JobDefinitionRepository, NodeRepository},
    SchedulerResult,
};
use jobsched_domain::{ExecutionOutcome, ExecutionStateMachine};

pub struct ExecutionCleanupService {
    node_id: String,
    definitions: Arc<dyn JobDefinitionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    nodes: Arc<dyn NodeRepository>,
    node_timeout: Duration,
}

impl ExecutionCleanupService {
    pub fn new(
        node_id: impl Into<String>,
        definitions: Arc<dyn JobDefinitionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        nodes: Arc<dyn NodeRepository>,
        node_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            definitions,
            executions,
            nodes,
            node_timeout,
        }
    }

    /// 把孤儿执行标记为 FAILED，返回处理的数量
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn cleanup_orphans(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let timeout = chrono::Duration::from_std(self.node_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let alive: HashSet<String> = self
            .nodes
            .list_alive(now - timeout)
            .await?
            .into_iter()
            .map(|node| node.node_id)
            .collect();

        let mut candidates = self.executions.find_by_status(ExecutionStatus::Running).await?;
        candidates.extend(self.executions.find_by_status(ExecutionStatus::Queued).await?);

        let mut cleaned = 0;
        for execution in candidates {
            let Some(reason) = self.orphan_reason(&execution, &alive) else {
                continue;
            };
            match self.fail_orphan(&execution, &reason, now).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(e) => warn!("清理执行 {} 失败: {}", execution.id, e),
            }
        }

        if cleaned > 0 {
            info!("已清理 {} 个孤儿执行", cleaned);
        }
        Ok(cleaned)
    }

    fn orphan_reason(&self, execution: &Execution, alive: &HashSet<String>) -> Option<String> {
        match execution.node_id.as_deref() {
            None => Some("执行没有归属节点".to_string()),
            Some(node) if node == self.node_id => Some("节点重启前未完成".to_string()),
            Some(node) if !alive.contains(node) => Some(format!("节点 {} 心跳超时", node)),
            Some(_) => None,
        }
    }

    async fn fail_orphan(
        &self,
        execution: &Execution,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let outcome = ExecutionOutcome::Failed {
            message: format!("执行被标记为失败: {}", reason),
            error: Some(reason.to_string()),
        };
        let (transition, entry) = ExecutionStateMachine::finish(execution, &outcome, now)?;
        if !self.executions.transition(&transition).await? {
            return Ok(false);
        }
        let logs = ExecutionStateMachine::retain_logs(execution, vec![entry]);
        self.executions.append_logs(execution.id, &logs).await?;
        warn!(
            execution_id = execution.id,
            "执行 {} 被标记为失败: {}",
            execution.id,
            reason
        );

        if let Some(definition) = self.definitions.get_by_id(execution.job_definition_id).await? {
            if definition.status == DefinitionStatus::Running {
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
            }
        }
        Ok(true)
    }
}
