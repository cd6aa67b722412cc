use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use jobsched_core::{models::NodeInfo, traits::NodeRepository, SchedulerResult};

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn heartbeat(&self, node: &NodeInfo) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (node_id, hostname, started_at, last_heartbeat)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                hostname = excluded.hostname,
                last_heartbeat = excluded.last_heartbeat
            "#,
        )
        .bind(&node.node_id)
        .bind(&node.hostname)
        .bind(node.started_at)
        .bind(node.last_heartbeat)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alive(&self, since: DateTime<Utc>) -> SchedulerResult<Vec<NodeInfo>> {
        let rows = sqlx::query(
            "SELECT node_id, hostname, started_at, last_heartbeat FROM nodes \
             WHERE last_heartbeat >= ? ORDER BY node_id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(NodeInfo {
                    node_id: row.try_get("node_id")?,
                    hostname: row.try_get("hostname")?,
                    started_at: row.try_get("started_at")?,
                    last_heartbeat: row.try_get("last_heartbeat")?,
                })
            })
            .collect()
    }
}
