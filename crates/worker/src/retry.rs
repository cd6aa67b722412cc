//! 失败执行的自动重试
//!
//! 执行结算后把重试请求放入有界通道，由 [`RetryPump`] 在退避等待后重新派发，
//! 工作池中的任务不会因为等待重试而被占用。

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use jobsched_core::{
    config::WorkerConfig,
    models::ExecutionOrigin,
    traits::{JobLauncher, LaunchOutcome},
};

/// 一次待派发的重试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub job_definition_id: i64,
    pub previous_execution_id: i64,
    /// 新执行的尝试序号
    pub attempt: i32,
    pub correlation_id: String,
}

impl RetryRequest {
    pub fn origin(&self) -> ExecutionOrigin {
        ExecutionOrigin::Retry {
            previous_execution_id: self.previous_execution_id,
            attempt: self.attempt,
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// 指数退避加随机抖动
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            backoff_multiplier: config.retry_backoff_multiplier,
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            jitter_factor: config.retry_jitter_factor,
        }
    }

    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// 第 `attempt` 次尝试之前的等待，第一次重试（attempt = 2）等待基础时长
    pub fn delay_for(&self, attempt: i32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2).max(0);
        let raw = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_factor > 0.0 {
            rand::rng().random_range(-self.jitter_factor..=self.jitter_factor)
        } else {
            0.0
        };
        Duration::from_millis((capped * (1.0 + jitter)).max(0.0) as u64)
    }
}

/// 重试泵：消费重试请求并在退避后重新派发
pub struct RetryPump {
    receiver: mpsc::Receiver<RetryRequest>,
    launcher: Arc<dyn JobLauncher>,
    policy: RetryPolicy,
}

impl RetryPump {
    pub fn new(
        receiver: mpsc::Receiver<RetryRequest>,
        launcher: Arc<dyn JobLauncher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            receiver,
            launcher,
            policy,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("重试泵启动");
        loop {
            tokio::select! {
                request = self.receiver.recv() => {
                    match request {
                        Some(request) => self.schedule(request),
                        None => {
                            info!("重试队列已关闭");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("重试泵收到关闭信号");
                    break;
                }
            }
        }
    }

    fn schedule(&self, request: RetryRequest) {
        let delay = self.policy.delay_for(request.attempt);
        let launcher = Arc::clone(&self.launcher);

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match launcher
                .launch(request.job_definition_id, request.origin())
                .await
            {
                Ok(LaunchOutcome::Accepted { execution_id }) => {
                    info!(
                        definition_id = request.job_definition_id,
                        execution_id = execution_id,
                        attempt = request.attempt,
                        correlation_id = %request.correlation_id,
                        "重试已派发"
                    );
                }
                Ok(LaunchOutcome::Skipped { reason }) => {
                    warn!(
                        definition_id = request.job_definition_id,
                        attempt = request.attempt,
                        "重试被跳过: {}",
                        reason
                    );
                }
                Err(e) => {
                    error!(
                        definition_id = request.job_definition_id,
                        attempt = request.attempt,
                        "重试派发失败: {}",
                        e
                    );
                }
            }
        });
    }
}
