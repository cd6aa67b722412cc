use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use jobsched_core::{models::NodeInfo, traits::NodeRepository, SchedulerResult};

/// 周期写入本节点心跳，其他节点据此判断本节点上的执行是否已成孤儿
pub struct NodeHeartbeat {
    node: NodeInfo,
    repository: Arc<dyn NodeRepository>,
    interval: Duration,
}

impl NodeHeartbeat {
    pub fn new(node_id: impl Into<String>, repository: Arc<dyn NodeRepository>, interval: Duration) -> Self {
        let now = Utc::now();
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            node: NodeInfo {
                node_id: node_id.into(),
                hostname,
                started_at: now,
                last_heartbeat: now,
            },
            repository,
            interval,
        }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub async fn beat(&mut self) -> SchedulerResult<()> {
        self.node.last_heartbeat = Utc::now();
        self.repository.heartbeat(&self.node).await?;
        debug!("节点 {} 心跳", self.node.node_id);
        Ok(())
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("节点 {} 心跳任务启动", self.node.node_id);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!("写入节点心跳失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("节点 {} 心跳任务停止", self.node.node_id);
                    break;
                }
            }
        }
    }
}
