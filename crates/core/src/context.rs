//! 作业执行上下文
//!
//! 上下文在调用 `Job::execute` 时传入，作业实例本身在多个执行之间共享，
//! 因此执行相关的状态只存在于上下文中。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::{JobParameters, LogEntry, LogLevel};

/// 执行级别的协作式取消句柄
///
/// 取消标志只由取消协调器写入，作业通过 [`CancellationHandle::poll`] 读取。
/// 作业一旦在轮询中看到取消请求，即视为已响应取消。
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    requested: Arc<AtomicBool>,
    observed: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// 供作业周期性调用，返回是否应当停止
    pub fn poll(&self) -> bool {
        let requested = self.is_requested();
        if requested {
            self.observed.store(true, Ordering::Release);
        }
        requested
    }

    /// 作业是否已经看到过取消请求
    pub fn was_observed(&self) -> bool {
        self.observed.load(Ordering::Acquire)
    }
}

/// 执行日志写入端
///
/// 低于阈值的日志在这里直接丢弃；保留的日志按顺序送往唯一的写入任务。
#[derive(Debug, Clone)]
pub struct ExecutionLogger {
    threshold: LogLevel,
    sink: mpsc::UnboundedSender<LogEntry>,
}

impl ExecutionLogger {
    /// 创建写入端以及对应的接收端
    pub fn channel(threshold: LogLevel) -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (sink, rx) = mpsc::unbounded_channel();
        (Self { threshold, sink }, rx)
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    /// 追加一条日志，返回是否被保留
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        if !self.threshold.admits(level) {
            return false;
        }
        // 接收端关闭说明执行已结束，迟到的日志直接丢弃
        self.sink.send(LogEntry::new(level, message)).is_ok()
    }

    pub fn trace(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Trace, message)
    }

    pub fn debug(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Error, message)
    }
}

/// 作业执行上下文
#[derive(Debug, Clone)]
pub struct JobContext {
    pub execution_id: i64,
    pub job_definition_id: i64,
    pub correlation_id: String,
    pub attempt: i32,
    pub node_id: String,
    /// 执行创建时的参数快照
    pub parameters: JobParameters,
    logger: ExecutionLogger,
    cancellation: Option<CancellationHandle>,
}

impl JobContext {
    pub fn new(
        execution_id: i64,
        job_definition_id: i64,
        correlation_id: impl Into<String>,
        attempt: i32,
        node_id: impl Into<String>,
        parameters: JobParameters,
        logger: ExecutionLogger,
    ) -> Self {
        Self {
            execution_id,
            job_definition_id,
            correlation_id: correlation_id.into(),
            attempt,
            node_id: node_id.into(),
            parameters,
            logger,
            cancellation: None,
        }
    }

    /// 注入取消句柄，只对可中止的作业调用
    pub fn with_cancellation(mut self, handle: CancellationHandle) -> Self {
        self.cancellation = Some(handle);
        self
    }

    pub fn logger(&self) -> &ExecutionLogger {
        &self.logger
    }

    pub fn cancellation(&self) -> Option<&CancellationHandle> {
        self.cancellation.as_ref()
    }

    /// 轮询取消请求；不可中止的作业永远返回 `false`
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|h| h.poll())
    }
}
