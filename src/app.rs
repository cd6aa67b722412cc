use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobsched_core::{AppConfig, JobRegistry};
use jobsched_dispatcher::{TriggerScheduler, TriggerSchedulerConfig};
use jobsched_infrastructure::{DatabaseManager, MetricsCollector, Repositories};
use jobsched_worker::{
    register_builtin_jobs, CancellationCoordinator, ExecutionCleanupService, ExecutionDispatcher,
    ExecutionDispatcherConfig, NodeHeartbeat, RetryPump,
};

use crate::admin::AdminService;
use crate::shutdown::ShutdownManager;

/// 单个节点的完整装配：存储、作业注册表、派发器、触发器调度循环和管理服务
pub struct Application {
    config: AppConfig,
    node_id: String,
    repos: Repositories,
    database: Option<DatabaseManager>,
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsCollector>,
    dispatcher: Arc<ExecutionDispatcher>,
    retry_pump: RetryPump,
    admin: Arc<AdminService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        let node_id = config.scheduler.resolve_node_id();
        info!("节点ID: {}", node_id);

        let (repos, database) = if config.database.is_in_memory() {
            info!("使用内存存储");
            (Repositories::in_memory(), None)
        } else {
            let manager = DatabaseManager::connect(&config.database)
                .await
                .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
            (Repositories::sqlite(manager.pool().clone()), Some(manager))
        };

        let registry = Arc::new(JobRegistry::new());
        register_builtin_jobs(&registry).await;

        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, retry_pump) = ExecutionDispatcher::new(
            repos.definitions.clone(),
            repos.executions.clone(),
            registry.clone(),
            metrics.clone(),
            ExecutionDispatcherConfig::from_config(&config.worker, node_id.clone()),
        );

        let cancellation = Arc::new(CancellationCoordinator::new(
            repos.definitions.clone(),
            repos.executions.clone(),
            registry.clone(),
            dispatcher.running(),
        ));
        let admin = Arc::new(AdminService::new(
            repos.clone(),
            registry.clone(),
            dispatcher.clone(),
            cancellation,
        ));

        Ok(Self {
            config,
            node_id,
            repos,
            database,
            registry,
            metrics,
            dispatcher,
            retry_pump,
            admin,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 启动前可以在这里注册自定义作业
    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn admin(&self) -> Arc<AdminService> {
        self.admin.clone()
    }

    /// 运行直到收到关闭信号，然后等待工作池排空
    pub async fn run(self, shutdown: ShutdownManager) -> Result<()> {
        let Self {
            config,
            node_id,
            repos,
            database,
            metrics,
            dispatcher,
            retry_pump,
            ..
        } = self;

        if config.scheduler.cleanup_on_startup {
            let cleanup = ExecutionCleanupService::new(
                node_id.clone(),
                repos.definitions.clone(),
                repos.executions.clone(),
                repos.nodes.clone(),
                config.scheduler.node_timeout(),
            );
            let cleaned = cleanup
                .cleanup_orphans(Utc::now())
                .await
                .context("清理遗留执行失败")?;
            info!("启动清理完成，处理了 {} 个遗留执行", cleaned);
        }

        let mut heartbeat = NodeHeartbeat::new(
            node_id.clone(),
            repos.nodes.clone(),
            config.scheduler.heartbeat_interval(),
        );
        heartbeat.beat().await.context("写入节点心跳失败")?;

        let mut handles: Vec<(&str, JoinHandle<()>)> = Vec::new();
        handles.push((
            "heartbeat",
            tokio::spawn(heartbeat.run(shutdown.subscribe().await)),
        ));
        handles.push((
            "retry-pump",
            tokio::spawn(retry_pump.run(shutdown.subscribe().await)),
        ));

        if config.scheduler.enabled {
            let scheduler = Arc::new(TriggerScheduler::new(
                repos.triggers.clone(),
                dispatcher.clone(),
                metrics,
                TriggerSchedulerConfig::from_config(&config.scheduler, node_id.clone()),
            ));
            let shutdown_rx = shutdown.subscribe().await;
            handles.push((
                "trigger-scheduler",
                tokio::spawn(async move { scheduler.run(shutdown_rx).await }),
            ));
        } else {
            info!("触发器调度已禁用，本节点只执行手动派发的作业");
        }

        info!("节点 {} 已启动", node_id);
        let mut shutdown_rx = shutdown.subscribe().await;
        let _ = shutdown_rx.recv().await;
        info!("开始关闭节点 {}", node_id);

        for (name, handle) in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("后台任务 {} 异常退出: {}", name, e),
                Err(_) => warn!("后台任务 {} 未在超时时间内退出", name),
            }
        }

        if !dispatcher.shutdown().await {
            warn!("仍有作业未结束，强制关闭");
        }
        if let Some(database) = database {
            database.close().await;
        }
        info!("节点 {} 已关闭", node_id);
        Ok(())
    }
}
