//! 数据访问层接口定义
//!
//! 这些接口把调度引擎与具体存储解耦。所有实现必须保证：
//! - 触发器认领是一次原子的条件更新，而不是先读后写
//! - 执行状态转换只在当前状态与预期一致时生效
//! - 统计快照的各部分来自同一个读视图

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        DefinitionStatus, Execution, ExecutionFilter, ExecutionStatus, ExecutionTransition,
        JobDefinition, LogEntry, NodeInfo, Page, PageRequest, StatsQuery, StatsSnapshot, Trigger,
        TriggerFireUpdate,
    },
    SchedulerResult,
};

/// 调度器写回到作业定义上的运行时状态，`None` 表示保持不变
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionStateUpdate {
    pub status: Option<DefinitionStatus>,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_end_time: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub retry_count: Option<i32>,
}

/// 作业定义仓库
#[async_trait]
pub trait JobDefinitionRepository: Send + Sync {
    /// 创建作业定义
    ///
    /// # 错误
    ///
    /// * `SchedulerError::Conflict` - 编码已存在，已有定义不受影响
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobDefinition>>;

    async fn get_by_code(&self, code: &str) -> SchedulerResult<Option<JobDefinition>>;

    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>>;

    /// 更新管理端维护的字段
    ///
    /// 编码、名称、描述、作业类型、启用标志、参数、日志级别和最大重试次数会被覆盖；
    /// 状态、最近结果等运行时字段保持不变，重试计数被截断到新的最大值以内。
    ///
    /// # 错误
    ///
    /// * `SchedulerError::NotFound` - 定义不存在
    /// * `SchedulerError::Conflict` - 新编码与其他定义冲突
    async fn update(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition>;

    /// 写回运行时状态
    async fn update_state(&self, id: i64, update: &DefinitionStateUpdate) -> SchedulerResult<()>;

    /// 物理删除，返回是否删除了记录
    async fn delete(&self, id: i64) -> SchedulerResult<bool>;
}

/// 触发器仓库
#[async_trait]
pub trait TriggerRepository: Send + Sync {
    async fn create(&self, trigger: &Trigger) -> SchedulerResult<Trigger>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Trigger>>;

    async fn list(&self) -> SchedulerResult<Vec<Trigger>>;

    async fn list_by_definition(&self, job_definition_id: i64) -> SchedulerResult<Vec<Trigger>>;

    /// 更新管理端维护的字段和下一次触发时间，同时清除租约
    async fn update(&self, trigger: &Trigger) -> SchedulerResult<Trigger>;

    async fn delete(&self, id: i64) -> SchedulerResult<bool>;

    /// 删除某个定义下的全部触发器，返回删除数量
    async fn delete_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64>;

    /// 查询到期的触发器
    ///
    /// 只返回启用的、所属定义也启用的、`next_fire_time <= now` 的触发器，
    /// 按优先级降序、下一次触发时间升序排列，最多 `limit` 条。
    /// 结果可能包含仍被其他节点持有租约的触发器，由认领步骤过滤。
    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Trigger>>;

    /// 尝试认领触发器
    ///
    /// 单次条件更新：仅当触发器未被认领或租约已过期（`claim_expiry <= now`）时，
    /// 写入 `claim_owner = node_id, claim_expiry = lease_until`。
    ///
    /// # 返回值
    ///
    /// 认领成功返回 `true`；输给其他节点返回 `false`，这不是错误。
    async fn try_claim(
        &self,
        trigger_id: i64,
        node_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// 写回触发簿记字段并释放租约
    ///
    /// 仅当租约仍属于 `node_id` 时生效，返回是否生效。
    async fn complete_fire(
        &self,
        trigger_id: i64,
        node_id: &str,
        update: &TriggerFireUpdate,
    ) -> SchedulerResult<bool>;

    /// 不修改簿记字段直接释放租约
    async fn release_claim(&self, trigger_id: i64, node_id: &str) -> SchedulerResult<bool>;
}

/// 执行实例仓库
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Execution>>;

    /// 某个定义下处于 QUEUED 或 RUNNING 的执行
    async fn find_active_by_definition(
        &self,
        job_definition_id: i64,
    ) -> SchedulerResult<Vec<Execution>>;

    async fn find_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<Execution>>;

    async fn count_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64>;

    /// 条件状态转换
    ///
    /// 仅当当前状态等于 `transition.from` 时写入新状态，返回是否生效。
    /// 进入 RUNNING 时写 `started_at`，进入终态时写 `ended_at` 和结果信息。
    async fn transition(&self, transition: &ExecutionTransition) -> SchedulerResult<bool>;

    /// 分页查询，按ID降序
    async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> SchedulerResult<Page<Execution>>;

    /// 追加日志条目，保持写入顺序
    async fn append_logs(&self, execution_id: i64, entries: &[LogEntry]) -> SchedulerResult<()>;

    async fn get_logs(&self, execution_id: i64) -> SchedulerResult<Vec<LogEntry>>;

    /// 标记取消请求，仅对 RUNNING 的执行生效
    async fn request_cancel(&self, execution_id: i64) -> SchedulerResult<bool>;

    async fn is_cancel_requested(&self, execution_id: i64) -> SchedulerResult<bool>;
}

/// 节点心跳仓库
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 写入或刷新节点心跳
    async fn heartbeat(&self, node: &NodeInfo) -> SchedulerResult<()>;

    /// 最近一次心跳不早于 `since` 的节点
    async fn list_alive(&self, since: DateTime<Utc>) -> SchedulerResult<Vec<NodeInfo>>;
}

/// 统计读取
#[async_trait]
pub trait StatsRepository: Send + Sync {
    /// 在一个一致的读视图中读取统计所需的全部数据
    async fn snapshot(&self, query: &StatsQuery) -> SchedulerResult<StatsSnapshot>;
}
