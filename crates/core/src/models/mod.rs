//! # 数据模型
//!
//! 定义作业调度引擎的核心数据结构：作业定义、触发器、执行实例、类型化参数、
//! 执行日志以及统计结果。
//!
//! ## 设计约定
//!
//! - 所有时间字段使用 `DateTime<Utc>`，时区只在CRON计算时参与
//! - 状态字段使用枚举类型，持久化为大写字符串（如 `RUNNING`）
//! - 新建实体的 `id` 为 0，由存储层分配

/// 为以大写文本持久化的枚举实现 `as_str`、`FromStr`、`Display` 以及 SQLite 编解码
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::SchedulerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err($crate::SchedulerError::Validation(format!(
                        "无效的{}取值: {}",
                        stringify!($ty),
                        s
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                s.parse::<$ty>().map_err(|e| e.to_string().into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub mod definition;
pub mod execution;
pub mod log;
pub mod node;
pub mod pagination;
pub mod parameters;
pub mod stats;
pub mod trigger;

pub use definition::{DefinitionStatus, JobDefinition};
pub use execution::{Execution, ExecutionOrigin, ExecutionStatus, ExecutionTransition};
pub use log::{LogEntry, LogLevel};
pub use node::NodeInfo;
pub use pagination::{ExecutionFilter, Page, PageRequest};
pub use parameters::{JobParameters, ParameterKind, ParameterSpec, ParameterValue};
pub use stats::{
    BucketSize, DefinitionSummary, ExecutionStats, ExecutionSummary, StatsQuery, StatsSnapshot,
    StatusCount, TopDefinition, TrendBucket,
};
pub use trigger::{MisfirePolicy, Trigger, TriggerFireUpdate};
