use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use jobsched_core::{
    models::{JobDefinition, ParameterKind, ParameterSpec, ParameterValue},
    traits::{Job, JobResult},
    JobContext, SchedulerResult,
};

/// 按保留天数清理数据
///
/// 这里只计算截止时间并记录清理计划，`dry_run` 关闭时由具体部署替换为真实清理。
pub struct DataCleanupJob;

#[async_trait]
impl Job for DataCleanupJob {
    fn name(&self) -> &str {
        "数据清理作业"
    }

    fn description(&self) -> &str {
        "清理超过保留天数的历史数据"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("retention_days", ParameterKind::Integer)
                .display_name("保留天数")
                .required()
                .range(1, 3650),
            ParameterSpec::new("target", ParameterKind::Enum)
                .display_name("清理对象")
                .options(["executions", "logs", "temp_files"])
                .default_value(ParameterValue::Enum("executions".to_string())),
            ParameterSpec::new("dry_run", ParameterKind::Boolean)
                .display_name("试运行")
                .description("只统计不删除")
                .default_value(ParameterValue::Boolean(true)),
        ]
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        let params = &context.parameters;
        let Some(retention_days) = params.get_i64("retention_days") else {
            return Ok(JobResult::failure("缺少参数", "retention_days 未设置"));
        };
        let target = params.get_str("target").unwrap_or("executions");
        let dry_run = params.get_bool("dry_run").unwrap_or(true);
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);

        context.logger().info(format!(
            "清理 {} 中早于 {} 的数据 (dry_run={})",
            target,
            cutoff.format("%Y-%m-%d %H:%M:%S"),
            dry_run
        ));

        Ok(JobResult::success_with_data(
            format!("{} 清理计划已生成", target),
            json!({
                "target": target,
                "cutoff": cutoff.to_rfc3339(),
                "dry_run": dry_run,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsched_core::models::JobParameters;

    fn definition(parameters: JobParameters) -> JobDefinition {
        let mut definition = JobDefinition::new("CLEANUP", "清理", "data-cleanup");
        definition.parameters = parameters;
        definition
    }

    #[test]
    fn test_requires_retention_days() {
        let job = DataCleanupJob;
        assert!(!job.validate(&definition(JobParameters::new())));

        let ok = JobParameters::new().with("retention_days", ParameterValue::Integer(30));
        assert!(job.validate(&definition(ok)));
    }

    #[test]
    fn test_rejects_out_of_range_and_unknown_target() {
        let job = DataCleanupJob;
        let too_long = JobParameters::new().with("retention_days", ParameterValue::Integer(5000));
        assert!(!job.validate(&definition(too_long)));

        let bad_target = JobParameters::new()
            .with("retention_days", ParameterValue::Integer(7))
            .with("target", ParameterValue::Enum("everything".to_string()));
        let errors = job.validation_errors(&definition(bad_target));
        assert_eq!(errors.len(), 1);
    }
}
