use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use jobsched_core::{
    models::{JobDefinition, ParameterKind, ParameterSpec, ParameterValue},
    traits::{Job, JobResult},
    JobContext, SchedulerResult,
};

/// 分批处理记录的可中止作业
///
/// 每批处理完检查一次取消标志，收到取消后停在当前批次。
pub struct BatchProcessingJob {
    batch_delay: Duration,
}

impl BatchProcessingJob {
    pub fn new(batch_delay: Duration) -> Self {
        Self { batch_delay }
    }
}

impl Default for BatchProcessingJob {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Job for BatchProcessingJob {
    fn name(&self) -> &str {
        "批处理作业"
    }

    fn description(&self) -> &str {
        "按批次处理记录，支持中途取消"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("total_records", ParameterKind::Integer)
                .display_name("记录总数")
                .range(1, 1_000_000)
                .default_value(ParameterValue::Integer(1000)),
            ParameterSpec::new("batch_size", ParameterKind::Integer)
                .display_name("批大小")
                .range(1, 10_000)
                .default_value(ParameterValue::Integer(100)),
        ]
    }

    fn is_abortable(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        let total = context.parameters.get_i64("total_records").unwrap_or(1000);
        let batch_size = context.parameters.get_i64("batch_size").unwrap_or(100).max(1);
        let logger = context.logger();

        let mut processed = 0;
        let mut batch = 0;
        while processed < total {
            if context.is_cancelled() {
                logger.warn(format!("收到取消请求，已处理 {}/{} 条", processed, total));
                return Ok(JobResult::success_with_data(
                    format!("在第 {} 批停止", batch),
                    json!({ "processed": processed, "total": total }),
                ));
            }

            batch += 1;
            processed = (processed + batch_size).min(total);
            logger.debug(format!("第 {} 批完成，累计 {} 条", batch, processed));
            tokio::time::sleep(self.batch_delay).await;
        }

        logger.info(format!("共处理 {} 条记录，{} 批", processed, batch));
        Ok(JobResult::success_with_data(
            format!("处理完成 {} 条", processed),
            json!({ "processed": processed, "batches": batch }),
        ))
    }
}
