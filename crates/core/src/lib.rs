pub mod config;
pub mod context;
pub mod errors;
pub mod job_registry;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use context::{CancellationHandle, ExecutionLogger, JobContext};
pub use errors::*;
pub use job_registry::{JobRegistry, JobTypeInfo};
pub use models::{
    DefinitionStatus, Execution, ExecutionOrigin, ExecutionStatus, JobDefinition, JobParameters,
    LogEntry, LogLevel, MisfirePolicy, ParameterKind, ParameterSpec, ParameterValue, Trigger,
};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
