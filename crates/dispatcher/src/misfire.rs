//! 错过触发的处理策略

use chrono::{DateTime, Duration, Utc};

use jobsched_core::models::MisfirePolicy;

/// 对一次到期触发的处理决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireAction {
    /// 按计划时间触发，下一次从计划时间推进
    FireAsScheduled,
    /// 已错过，立即补触发一次，之后从当前时间重新计算
    FireOnceNow,
    /// 已错过，丢弃本次，从当前时间重新计算下一次
    SkipAndResync,
}

impl MisfireAction {
    pub fn fires(&self) -> bool {
        !matches!(self, MisfireAction::SkipAndResync)
    }
}

/// 计划时间落后当前时间超过一个轮询周期即视为错过
pub fn is_misfired(scheduled: DateTime<Utc>, now: DateTime<Utc>, poll_interval: Duration) -> bool {
    now - scheduled > poll_interval
}

pub fn resolve_misfire(
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    poll_interval: Duration,
    policy: MisfirePolicy,
) -> MisfireAction {
    if !is_misfired(scheduled, now, poll_interval) {
        return MisfireAction::FireAsScheduled;
    }

    match policy {
        MisfirePolicy::DoNothing => MisfireAction::SkipAndResync,
        MisfirePolicy::IgnoreMisfire => MisfireAction::FireAsScheduled,
        // SMART_POLICY 固定按 FIRE_ONCE_NOW 处理
        MisfirePolicy::FireOnceNow | MisfirePolicy::SmartPolicy => MisfireAction::FireOnceNow,
    }
}
