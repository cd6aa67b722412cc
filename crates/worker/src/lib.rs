//! 作业执行端：派发、工作池、重试、取消以及节点级的维护任务。
//!
//! [`ExecutionDispatcher`] 是触发器调度和手动执行共同的入口，
//! 创建它时会同时得到消费重试请求的 [`RetryPump`]，两者都需要由应用启动。

pub mod cancellation;
pub mod cleanup;
pub mod dispatcher;
pub mod heartbeat;
pub mod jobs;
pub mod retry;
pub mod running;

pub use cancellation::CancellationCoordinator;
pub use cleanup::ExecutionCleanupService;
pub use dispatcher::{ExecutionDispatcher, ExecutionDispatcherConfig};
pub use heartbeat::NodeHeartbeat;
pub use jobs::{register_builtin_jobs, BatchProcessingJob, DataCleanupJob, LoggingJob};
pub use retry::{RetryPolicy, RetryPump, RetryRequest};
pub use running::RunningExecutions;
