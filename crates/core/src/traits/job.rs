//! 作业实现接口
//!
//! 作业作者只需要实现 [`Job::name`] 和 [`Job::execute`]，其余能力都有默认实现：
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use jobsched_core::traits::{Job, JobResult};
//! use jobsched_core::{JobContext, JobDefinition, SchedulerResult};
//!
//! struct ReportJob;
//!
//! #[async_trait]
//! impl Job for ReportJob {
//!     fn name(&self) -> &str {
//!         "report"
//!     }
//!
//!     async fn execute(
//!         &self,
//!         _definition: &JobDefinition,
//!         ctx: &JobContext,
//!     ) -> SchedulerResult<JobResult> {
//!         ctx.logger().info("生成报表");
//!         Ok(JobResult::success("报表已生成"))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    context::JobContext,
    models::{parameters::check_parameters, JobDefinition, ParameterSpec},
    SchedulerResult,
};

/// 作业执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn success_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success(message)
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// 作业能力集
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 作业接受的参数声明
    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    /// 派发前的校验，默认按参数声明检查定义上的参数
    fn validate(&self, definition: &JobDefinition) -> bool {
        self.validation_errors(definition).is_empty()
    }

    /// 校验失败的原因，用于写入失败的执行记录
    fn validation_errors(&self, definition: &JobDefinition) -> Vec<String> {
        check_parameters(&self.parameters(), &definition.parameters)
    }

    /// 是否支持协作式取消；为 `true` 时上下文中会带有取消句柄
    fn is_abortable(&self) -> bool {
        false
    }

    /// 执行作业
    ///
    /// `definition.parameters` 已替换为执行创建时的参数快照。
    /// 返回 `Err` 与发生 panic 一样会被记录为失败的执行。
    async fn execute(
        &self,
        definition: &JobDefinition,
        context: &JobContext,
    ) -> SchedulerResult<JobResult>;
}
