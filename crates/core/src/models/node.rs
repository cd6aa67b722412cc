use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调度节点心跳记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub node_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeInfo {
    pub fn is_alive(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_heartbeat >= cutoff
    }
}
