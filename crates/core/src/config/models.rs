use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// 数据库配置
///
/// `url` 为 `memory` 时使用进程内存储，否则必须是 SQLite 连接串。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://jobsched.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url == "memory"
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(anyhow!("数据库URL不能为空"));
        }

        if !self.is_in_memory() && !self.url.starts_with("sqlite:") {
            return Err(anyhow!("数据库URL必须是SQLite格式或memory: {}", self.url));
        }

        if self.max_connections == 0 {
            return Err(anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 触发器调度循环配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 节点标识，未配置时使用主机名加随机后缀
    pub node_id: Option<String>,
    pub poll_interval_ms: u64,
    /// 认领租约时长，至少为轮询间隔的两倍
    pub lease_duration_ms: u64,
    /// 每个周期最多处理的到期触发器数量
    pub batch_size: usize,
    pub heartbeat_interval_ms: u64,
    /// 超过该时长没有心跳的节点视为失联
    pub node_timeout_ms: u64,
    /// 启动时清理遗留的运行中执行
    pub cleanup_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: None,
            poll_interval_ms: 1_000,
            lease_duration_ms: 30_000,
            batch_size: 100,
            heartbeat_interval_ms: 10_000,
            node_timeout_ms: 60_000,
            cleanup_on_startup: true,
        }
    }
}

impl SchedulerConfig {
    pub const LEASE_SAFETY_FACTOR: u64 = 2;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// 配置的节点ID，或 `<hostname>-<8位随机>`
    pub fn resolve_node_id(&self) -> String {
        if let Some(node_id) = self.node_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return node_id.clone();
        }

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", host, &suffix[..8])
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("轮询间隔必须大于0"));
        }

        if self.lease_duration_ms < self.poll_interval_ms * Self::LEASE_SAFETY_FACTOR {
            return Err(anyhow!(
                "租约时长 {}ms 必须至少是轮询间隔 {}ms 的 {} 倍",
                self.lease_duration_ms,
                self.poll_interval_ms,
                Self::LEASE_SAFETY_FACTOR
            ));
        }

        if self.batch_size == 0 {
            return Err(anyhow!("批处理大小必须大于0"));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow!("心跳间隔必须大于0"));
        }

        if self.node_timeout_ms <= self.heartbeat_interval_ms {
            return Err(anyhow!("节点超时时间必须大于心跳间隔"));
        }

        Ok(())
    }
}

/// 执行工作池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// 同时运行的作业上限
    pub pool_size: usize,
    pub retry_queue_capacity: usize,
    /// 运行中作业检查持久化取消请求的间隔
    pub cancel_check_interval_ms: u64,
    /// 关闭时等待运行中作业结束的时长
    pub drain_timeout_seconds: u64,
    /// 重试前的基础等待，0 表示立即重试
    pub retry_base_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_factor: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            retry_queue_capacity: 1024,
            cancel_check_interval_ms: 1_000,
            drain_timeout_seconds: 30,
            retry_base_delay_ms: 0,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 60_000,
            retry_jitter_factor: 0.1,
        }
    }
}

impl WorkerConfig {
    pub fn cancel_check_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_check_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(anyhow!("工作池大小必须大于0"));
        }

        if self.retry_queue_capacity == 0 {
            return Err(anyhow!("重试队列容量必须大于0"));
        }

        if self.cancel_check_interval_ms == 0 {
            return Err(anyhow!("取消检查间隔必须大于0"));
        }

        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow!("重试退避倍数不能小于1"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(anyhow!("重试抖动系数必须在0到1之间"));
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(anyhow!("最大重试等待不能小于基础等待"));
        }

        Ok(())
    }
}

/// 日志与指标配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `json` 或 `pretty`
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow!(
                "无效的日志格式: {}，支持的格式: {:?}",
                self.log_format,
                valid_formats
            ));
        }

        if self.metrics_enabled && self.metrics_bind_address.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(anyhow!("无效的指标监听地址: {}", self.metrics_bind_address));
        }

        Ok(())
    }
}
