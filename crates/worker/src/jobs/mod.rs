//! 内置作业
//!
//! 新的作业类型实现 [`Job`](jobsched_core::traits::Job) 后注册到
//! [`JobRegistry`]，作业定义通过 `job_type` 引用注册名。

mod batch;
mod data_cleanup;
mod logging;

use std::sync::Arc;

use jobsched_core::JobRegistry;

pub use batch::BatchProcessingJob;
pub use data_cleanup::DataCleanupJob;
pub use logging::LoggingJob;

/// 注册全部内置作业
pub async fn register_builtin_jobs(registry: &JobRegistry) {
    registry.register("logging", Arc::new(LoggingJob)).await;
    registry
        .register("batch-processing", Arc::new(BatchProcessingJob::default()))
        .await;
    registry.register("data-cleanup", Arc::new(DataCleanupJob)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_builtin_jobs() {
        let registry = JobRegistry::new();
        register_builtin_jobs(&registry).await;

        let mut types = registry.list_job_types().await;
        types.sort();
        assert_eq!(types, vec!["batch-processing", "data-cleanup", "logging"]);
        assert!(registry
            .get("batch-processing")
            .await
            .is_some_and(|job| job.is_abortable()));
    }
}
