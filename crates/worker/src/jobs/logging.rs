use async_trait::async_trait;

use jobsched_core::{
    models::{JobDefinition, ParameterKind, ParameterSpec},
    traits::{Job, JobResult},
    JobContext, SchedulerResult,
};

/// 把参数 `message` 写入执行日志
pub struct LoggingJob;

#[async_trait]
impl Job for LoggingJob {
    fn name(&self) -> &str {
        "日志作业"
    }

    fn description(&self) -> &str {
        "向执行日志写入一条消息，用于验证调度链路"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new("message", ParameterKind::String)
            .display_name("消息")
            .description("写入执行日志的内容")]
    }

    async fn execute(
        &self,
        definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        let message = context
            .parameters
            .get_str("message")
            .unwrap_or("Hello from jobsched");
        context.logger().info(format!("[{}] {}", definition.code, message));
        Ok(JobResult::success(message))
    }
}
