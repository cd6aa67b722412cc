//! SQLite 存储实现

mod definition_repository;
mod execution_repository;
mod node_repository;
mod stats_repository;
mod trigger_repository;

pub use definition_repository::SqliteJobDefinitionRepository;
pub use execution_repository::SqliteExecutionRepository;
pub use node_repository::SqliteNodeRepository;
pub use stats_repository::SqliteStatsRepository;
pub use trigger_repository::SqliteTriggerRepository;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use jobsched_core::{config::models::DatabaseConfig, SchedulerResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_definitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        job_type TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'UNKNOWN',
        last_start_time TEXT,
        last_end_time TEXT,
        last_result TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retry_count INTEGER NOT NULL DEFAULT 3,
        parameters TEXT NOT NULL DEFAULT '{}',
        log_level TEXT NOT NULL DEFAULT 'INFO',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (retry_count >= 0 AND retry_count <= max_retry_count)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS triggers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_definition_id INTEGER NOT NULL REFERENCES job_definitions(id),
        name TEXT NOT NULL,
        description TEXT,
        cron_expression TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        start_time TEXT,
        end_time TEXT,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        priority INTEGER NOT NULL DEFAULT 5,
        misfire_policy TEXT NOT NULL DEFAULT 'SMART_POLICY',
        claim_owner TEXT,
        claim_expiry TEXT,
        last_fire_time TEXT,
        next_fire_time TEXT,
        fire_count INTEGER NOT NULL DEFAULT 0,
        max_fire_count INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_definition_id INTEGER NOT NULL REFERENCES job_definitions(id),
        trigger_id INTEGER,
        status TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT,
        attempt INTEGER NOT NULL DEFAULT 1,
        correlation_id TEXT NOT NULL,
        node_id TEXT,
        parameters TEXT NOT NULL DEFAULT '{}',
        log_level TEXT NOT NULL DEFAULT 'INFO',
        result_message TEXT,
        error_message TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        node_id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        started_at TEXT NOT NULL,
        last_heartbeat TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_triggers_due ON triggers(enabled, next_fire_time)",
    "CREATE INDEX IF NOT EXISTS idx_triggers_definition ON triggers(job_definition_id)",
    "CREATE INDEX IF NOT EXISTS idx_executions_definition ON executions(job_definition_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
    "CREATE INDEX IF NOT EXISTS idx_executions_created_at ON executions(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_execution_logs_execution ON execution_logs(execution_id, id)",
];

/// 是否为进程内的内存数据库，每个连接都会得到一个独立的库
fn is_in_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 按配置连接数据库并创建表结构
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = is_in_memory_url(&config.url);

        let mut options = SqliteConnectOptions::from_str(&config.url)
            .context("解析数据库URL失败")?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let max_connections = if in_memory { 1 } else { config.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .context("创建数据库连接池失败")?;

        let manager = Self { pool };
        manager.migrate().await.context("初始化数据库表结构失败")?;
        info!("数据库已就绪: {}", config.url);
        Ok(manager)
    }

    /// 单连接的内存数据库，供测试使用
    pub async fn in_memory() -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        debug!("创建SQLite表结构");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
