use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("无效的CRON表达式: {expr} - {message}")]
    ParseError { expr: String, message: String },

    #[error("CRON表达式在搜索范围内没有后续触发时间: {expr}")]
    NoFutureFireTime { expr: String },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("触发器 {trigger_id} 已被其他节点认领")]
    ClaimConflict { trigger_id: i64 },

    #[error("作业执行失败: {0}")]
    DispatchFailure(String),

    #[error("执行实例 {execution_id} 对应的作业不支持中止")]
    NotAbortable { execution_id: i64 },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("{entity}未找到: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn definition_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "作业定义",
            id: id.to_string(),
        }
    }

    pub fn trigger_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "触发器",
            id: id.to_string(),
        }
    }

    pub fn execution_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "执行实例",
            id: id.to_string(),
        }
    }

    pub fn job_type_not_found(job_type: &str) -> Self {
        Self::NotFound {
            entity: "作业类型",
            id: job_type.to_string(),
        }
    }

    /// 是否应直接返回给发起请求的调用方
    ///
    /// `ClaimConflict` 与 `DispatchFailure` 只在本地记录，不向调用方暴露。
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. }
                | Self::NoFutureFireTime { .. }
                | Self::Validation(_)
                | Self::NotAbortable { .. }
                | Self::InvalidStateTransition { .. }
                | Self::NotFound { .. }
                | Self::Conflict(_)
        )
    }

    /// 暂时性故障，下一个调度周期可以重试
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            Self::ClaimConflict { .. } => true,
            _ => false,
        }
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_conflict_is_not_user_facing() {
        let err = SchedulerError::ClaimConflict { trigger_id: 7 };
        assert!(!err.is_user_facing());
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_message() {
        let err = SchedulerError::definition_not_found(42);
        assert!(err.is_user_facing());
        assert_eq!(err.to_string(), "作业定义未找到: 42");
    }

    #[test]
    fn test_dispatch_failure_stays_internal() {
        let err = SchedulerError::DispatchFailure("boom".to_string());
        assert!(!err.is_user_facing());
        assert!(!err.is_transient());
    }
}
