use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 作业日志级别
///
/// 顺序为 `TRACE < DEBUG < INFO < WARN < ERROR`，`OFF` 作为阈值时屏蔽所有日志。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

text_enum!(LogLevel {
    Trace => "TRACE",
    Debug => "DEBUG",
    Info => "INFO",
    Warn => "WARN",
    Error => "ERROR",
    Off => "OFF",
});

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    /// 以 `self` 作为阈值时，`level` 级别的日志是否应被保留
    pub fn admits(&self, level: LogLevel) -> bool {
        *self != LogLevel::Off && level != LogLevel::Off && level >= *self
    }
}

/// 单条执行日志
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ordering() {
        assert!(LogLevel::Info.admits(LogLevel::Warn));
        assert!(LogLevel::Info.admits(LogLevel::Info));
        assert!(!LogLevel::Info.admits(LogLevel::Debug));
        assert!(LogLevel::Trace.admits(LogLevel::Trace));
    }

    #[test]
    fn test_off_suppresses_everything() {
        assert!(!LogLevel::Off.admits(LogLevel::Error));
        assert!(!LogLevel::Off.admits(LogLevel::Trace));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
