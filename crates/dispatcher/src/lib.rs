//! 触发器调度
//!
//! - [`cron`]：六字段CRON表达式的解析与求值
//! - [`misfire`]：错过触发的判定与处理策略
//! - [`scheduler`]：每个节点上的轮询认领循环

pub mod cron;
pub mod misfire;
pub mod scheduler;

pub use cron::{parse_timezone, CronExpression};
pub use misfire::{is_misfired, resolve_misfire, MisfireAction};
pub use scheduler::{compute_next_fire, CycleReport, TriggerScheduler, TriggerSchedulerConfig};
