//! 行为固定的测试作业
//!
//! 每个作业都记录被调用的次数，便于断言派发次数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use jobsched_core::{
    models::{JobDefinition, ParameterKind, ParameterSpec},
    traits::{Job, JobResult},
    JobContext, SchedulerError, SchedulerResult,
};

/// 调用计数器，克隆后共享同一个计数
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// 总是成功
#[derive(Debug, Clone, Default)]
pub struct SucceedingJob {
    pub calls: CallCounter,
}

#[async_trait]
impl Job for SucceedingJob {
    fn name(&self) -> &str {
        "succeeding"
    }

    fn description(&self) -> &str {
        "总是成功的测试作业"
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        let n = self.calls.hit();
        context.logger().debug(format!("第 {} 次调用", n));
        context.logger().info("测试作业执行完成");
        Ok(JobResult::success("ok"))
    }
}

/// 总是返回失败结果
#[derive(Debug, Clone, Default)]
pub struct AlwaysFailJob {
    pub calls: CallCounter,
}

#[async_trait]
impl Job for AlwaysFailJob {
    fn name(&self) -> &str {
        "always-fail"
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        context.logger().error("模拟失败");
        Ok(JobResult::failure("模拟失败", "always-fail"))
    }
}

/// 返回 `Err` 而不是失败结果
#[derive(Debug, Clone, Default)]
pub struct ErroringJob {
    pub calls: CallCounter,
}

#[async_trait]
impl Job for ErroringJob {
    fn name(&self) -> &str {
        "erroring"
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        _context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        Err(SchedulerError::Internal("模拟的内部错误".to_string()))
    }
}

/// 执行时 panic
#[derive(Debug, Clone, Default)]
pub struct PanickingJob {
    pub calls: CallCounter,
}

#[async_trait]
impl Job for PanickingJob {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        _context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        panic!("模拟的作业崩溃");
    }
}

/// 分步执行、每步之间轮询取消标志的可中止作业
///
/// `started` 在第一步开始前通知一次，测试可以据此等待作业进入运行状态。
#[derive(Debug, Clone)]
pub struct CooperativeAbortableJob {
    pub calls: CallCounter,
    pub started: Arc<Notify>,
    pub steps: u32,
    pub step_delay: Duration,
}

impl CooperativeAbortableJob {
    pub fn new(steps: u32, step_delay: Duration) -> Self {
        Self {
            calls: CallCounter::default(),
            started: Arc::new(Notify::new()),
            steps,
            step_delay,
        }
    }
}

impl Default for CooperativeAbortableJob {
    fn default() -> Self {
        Self::new(200, Duration::from_millis(10))
    }
}

#[async_trait]
impl Job for CooperativeAbortableJob {
    fn name(&self) -> &str {
        "cooperative-abortable"
    }

    fn is_abortable(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        self.started.notify_one();

        for step in 0..self.steps {
            if context.is_cancelled() {
                context.logger().warn(format!("在第 {} 步收到取消请求", step));
                return Ok(JobResult::success(format!("在第 {} 步停止", step)));
            }
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(JobResult::success(format!("完成 {} 步", self.steps)))
    }
}

/// 不可中止的慢作业
#[derive(Debug, Clone)]
pub struct SlowJob {
    pub calls: CallCounter,
    pub started: Arc<Notify>,
    pub duration: Duration,
}

impl SlowJob {
    pub fn new(duration: Duration) -> Self {
        Self {
            calls: CallCounter::default(),
            started: Arc::new(Notify::new()),
            duration,
        }
    }
}

#[async_trait]
impl Job for SlowJob {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        _context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        self.started.notify_one();
        tokio::time::sleep(self.duration).await;
        Ok(JobResult::success("慢作业完成"))
    }
}

/// 声明了必填参数 `target` 的作业，定义缺少该参数时校验失败
#[derive(Debug, Clone, Default)]
pub struct RequiredParameterJob {
    pub calls: CallCounter,
}

#[async_trait]
impl Job for RequiredParameterJob {
    fn name(&self) -> &str {
        "required-parameter"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new("target", ParameterKind::String)
            .display_name("目标")
            .required()]
    }

    async fn execute(
        &self,
        _definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult> {
        self.calls.hit();
        let target = context.parameters.get_str("target").unwrap_or_default();
        Ok(JobResult::success(format!("处理 {}", target)))
    }
}
