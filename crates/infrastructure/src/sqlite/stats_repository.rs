use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

use jobsched_core::{
    models::{DefinitionSummary, ExecutionSummary, StatsQuery, StatsSnapshot},
    traits::StatsRepository,
    SchedulerResult,
};

pub struct SqliteStatsRepository {
    pool: SqlitePool,
}

impl SqliteStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatsRepository for SqliteStatsRepository {
    /// 三个查询放在同一个事务里，SQLite 的读事务保证它们看到同一个数据版本
    #[instrument(skip(self), fields(from = %query.from, to = %query.to))]
    async fn snapshot(&self, query: &StatsQuery) -> SchedulerResult<StatsSnapshot> {
        let mut tx = self.pool.begin().await?;

        let definitions = sqlx::query(
            "SELECT id, code, name, enabled, status FROM job_definitions ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| {
            Ok(DefinitionSummary {
                id: row.try_get("id")?,
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                enabled: row.try_get("enabled")?,
                status: row.try_get("status")?,
            })
        })
        .collect::<SchedulerResult<Vec<_>>>()?;

        let trigger_enabled = sqlx::query_scalar::<_, bool>("SELECT enabled FROM triggers ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, job_definition_id, status, created_at, started_at, ended_at \
             FROM executions WHERE created_at >= ",
        );
        builder
            .push_bind(query.from)
            .push(" AND created_at < ")
            .push_bind(query.to);
        if let Some(id) = query.job_definition_id {
            builder.push(" AND job_definition_id = ").push_bind(id);
        }
        builder.push(" ORDER BY id");

        let executions = builder
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| {
                Ok(ExecutionSummary {
                    id: row.try_get("id")?,
                    job_definition_id: row.try_get("job_definition_id")?,
                    status: row.try_get("status")?,
                    created_at: row.try_get("created_at")?,
                    started_at: row.try_get("started_at")?,
                    ended_at: row.try_get("ended_at")?,
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        tx.commit().await?;

        Ok(StatsSnapshot {
            definitions,
            trigger_enabled,
            executions,
            taken_at: Utc::now(),
        })
    }
}
