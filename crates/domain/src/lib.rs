//! 作业调度的纯领域规则：执行生命周期状态机、执行结果对定义的结算以及统计聚合。
//!
//! 这里的函数不做任何IO，调用方负责从仓库读取数据并写回结果。

pub mod lifecycle;
pub mod settlement;
pub mod stats;

pub use lifecycle::{ExecutionOutcome, ExecutionStateMachine};
pub use settlement::{settle_definition, RetryDecision, Settlement};
pub use stats::{success_rate, StatsAggregator};
