//! 调度引擎指标
//!
//! 通过 `metrics` 门面记录，未安装导出器时所有记录都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

use jobsched_core::models::ExecutionStatus;

pub struct MetricsCollector {
    // 触发器认领
    claims_won: Counter,
    claims_lost: Counter,
    trigger_fires: Counter,
    trigger_misfires: Counter,
    scheduling_cycle_duration: Histogram,

    // 执行
    executions_succeeded: Counter,
    executions_failed: Counter,
    executions_cancelled: Counter,
    execution_duration: Histogram,
    execution_retries: Counter,
    validation_failures: Counter,
    active_executions: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            claims_won: counter!("jobsched_trigger_claims_total", "result" => "won"),
            claims_lost: counter!("jobsched_trigger_claims_total", "result" => "lost"),
            trigger_fires: counter!("jobsched_trigger_fires_total"),
            trigger_misfires: counter!("jobsched_trigger_misfires_total"),
            scheduling_cycle_duration: histogram!("jobsched_scheduling_cycle_duration_seconds"),
            executions_succeeded: counter!("jobsched_executions_total", "status" => "SUCCESS"),
            executions_failed: counter!("jobsched_executions_total", "status" => "FAILED"),
            executions_cancelled: counter!("jobsched_executions_total", "status" => "CANCELLED"),
            execution_duration: histogram!("jobsched_execution_duration_seconds"),
            execution_retries: counter!("jobsched_execution_retries_total"),
            validation_failures: counter!("jobsched_validation_failures_total"),
            active_executions: gauge!("jobsched_active_executions"),
        }
    }

    /// 记录一次认领尝试的结果
    pub fn record_claim(&self, won: bool) {
        if won {
            self.claims_won.increment(1);
        } else {
            self.claims_lost.increment(1);
        }
    }

    pub fn record_trigger_fire(&self, misfired: bool) {
        self.trigger_fires.increment(1);
        if misfired {
            self.trigger_misfires.increment(1);
        }
    }

    /// 被 DO_NOTHING 丢弃的错过触发
    pub fn record_misfire_skipped(&self) {
        self.trigger_misfires.increment(1);
    }

    pub fn record_scheduling_cycle(&self, duration_seconds: f64, fired: usize) {
        self.scheduling_cycle_duration.record(duration_seconds);
        debug!(
            duration_seconds = duration_seconds,
            fired = fired,
            "调度周期完成"
        );
    }

    pub fn record_execution_finished(&self, status: ExecutionStatus, duration_seconds: f64) {
        match status {
            ExecutionStatus::Success => self.executions_succeeded.increment(1),
            ExecutionStatus::Failed => self.executions_failed.increment(1),
            ExecutionStatus::Cancelled => self.executions_cancelled.increment(1),
            ExecutionStatus::Queued | ExecutionStatus::Running => return,
        }
        self.execution_duration.record(duration_seconds);
    }

    pub fn record_retry(&self) {
        self.execution_retries.increment(1);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.increment(1);
    }

    pub fn execution_started(&self) {
        self.active_executions.increment(1.0);
    }

    pub fn execution_ended(&self) {
        self.active_executions.decrement(1.0);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
