//! # 存储与指标基础设施
//!
//! 提供核心仓库接口的两套实现：
//!
//! - [`InMemoryStore`]：进程内存储，用于测试和单节点演示
//! - [`sqlite`]：基于 `sqlx` 的 SQLite 存储，多个节点共享同一个数据库文件时
//!   依靠条件更新完成触发器认领
//!
//! 以及 [`MetricsCollector`]，调度与执行路径上的 Prometheus 指标。

pub mod memory;
pub mod metrics;
pub mod sqlite;

use std::sync::Arc;

use jobsched_core::traits::{
    ExecutionRepository, JobDefinitionRepository, NodeRepository, StatsRepository,
    TriggerRepository,
};

pub use memory::InMemoryStore;
pub use metrics::MetricsCollector;
pub use sqlite::{
    DatabaseManager, SqliteExecutionRepository, SqliteJobDefinitionRepository,
    SqliteNodeRepository, SqliteStatsRepository, SqliteTriggerRepository,
};

/// 一组共享同一存储的仓库
#[derive(Clone)]
pub struct Repositories {
    pub definitions: Arc<dyn JobDefinitionRepository>,
    pub triggers: Arc<dyn TriggerRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }

    /// 以同一个内存存储构建，测试中可以同时持有 `store` 观察内部状态
    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            definitions: store.clone(),
            triggers: store.clone(),
            executions: store.clone(),
            nodes: store.clone(),
            stats: store,
        }
    }

    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        Self {
            definitions: Arc::new(SqliteJobDefinitionRepository::new(pool.clone())),
            triggers: Arc::new(SqliteTriggerRepository::new(pool.clone())),
            executions: Arc::new(SqliteExecutionRepository::new(pool.clone())),
            nodes: Arc::new(SqliteNodeRepository::new(pool.clone())),
            stats: Arc::new(SqliteStatsRepository::new(pool)),
        }
    }
}
