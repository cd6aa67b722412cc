use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

use jobsched_core::{
    models::{
        Execution, ExecutionFilter, ExecutionStatus, ExecutionTransition, JobParameters, LogEntry,
        Page, PageRequest,
    },
    traits::ExecutionRepository,
    SchedulerResult,
};

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &SqliteRow) -> SchedulerResult<Execution> {
        let parameters: String = row.try_get("parameters")?;
        Ok(Execution {
            id: row.try_get("id")?,
            job_definition_id: row.try_get("job_definition_id")?,
            trigger_id: row.try_get("trigger_id")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            attempt: row.try_get("attempt")?,
            correlation_id: row.try_get("correlation_id")?,
            node_id: row.try_get("node_id")?,
            parameters: JobParameters::from_json(&parameters)?,
            log_level: row.try_get("log_level")?,
            result_message: row.try_get("result_message")?,
            error_message: row.try_get("error_message")?,
            cancel_requested: row.try_get("cancel_requested")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// 把过滤条件追加为 WHERE 子句
    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ExecutionFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(id) = filter.job_definition_id {
            builder.push(" AND job_definition_id = ").push_bind(id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(node_id) = &filter.node_id {
            builder.push(" AND node_id = ").push_bind(node_id.clone());
        }
        if let Some(from) = filter.from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND created_at < ").push_bind(to);
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, job_definition_id, trigger_id, status, started_at, \
     ended_at, attempt, correlation_id, node_id, parameters, log_level, result_message, \
     error_message, cancel_requested, created_at FROM executions";

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, execution), fields(definition_id = execution.job_definition_id))]
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution> {
        let row = sqlx::query(
            r#"
            INSERT INTO executions (
                job_definition_id, trigger_id, status, started_at, ended_at, attempt,
                correlation_id, node_id, parameters, log_level, result_message, error_message,
                cancel_requested, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(execution.job_definition_id)
        .bind(execution.trigger_id)
        .bind(execution.status)
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .bind(execution.attempt)
        .bind(&execution.correlation_id)
        .bind(&execution.node_id)
        .bind(execution.parameters.to_json()?)
        .bind(execution.log_level)
        .bind(&execution.result_message)
        .bind(&execution.error_message)
        .bind(execution.cancel_requested)
        .bind(execution.created_at)
        .fetch_one(&self.pool)
        .await?;

        let mut created = execution.clone();
        created.id = row.try_get("id")?;
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Execution>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn find_active_by_definition(
        &self,
        job_definition_id: i64,
    ) -> SchedulerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "{} WHERE job_definition_id = ? AND status IN ('QUEUED', 'RUNNING') ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(job_definition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<Execution>> {
        let rows = sqlx::query(&format!("{} WHERE status = ? ORDER BY id", SELECT_COLUMNS))
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn count_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM executions WHERE job_definition_id = ?")
                .bind(job_definition_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn transition(&self, transition: &ExecutionTransition) -> SchedulerResult<bool> {
        let terminal = transition.to.is_terminal();
        let started_at = (transition.to == ExecutionStatus::Running).then_some(transition.at);
        let ended_at = terminal.then_some(transition.at);
        let message = transition.message.as_deref().filter(|_| terminal);
        let error = transition.error.as_deref().filter(|_| terminal);

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?,
                started_at = COALESCE(?, started_at),
                ended_at = COALESCE(?, ended_at),
                result_message = COALESCE(?, result_message),
                error_message = COALESCE(?, error_message)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(transition.to)
        .bind(started_at)
        .bind(ended_at)
        .bind(message)
        .bind(error)
        .bind(transition.execution_id)
        .bind(transition.from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> SchedulerResult<Page<Execution>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM executions");
        Self::push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        Self::push_filter(&mut query, filter);
        query
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.size as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows = query.build().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(Self::row_to_execution)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn append_logs(&self, execution_id: i64, entries: &[LogEntry]) -> SchedulerResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("INSERT INTO execution_logs (execution_id, timestamp, level, message) ");
        builder.push_values(entries, |mut row, entry| {
            row.push_bind(execution_id)
                .push_bind(entry.timestamp)
                .push_bind(entry.level)
                .push_bind(entry.message.clone());
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn get_logs(&self, execution_id: i64) -> SchedulerResult<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT timestamp, level, message FROM execution_logs WHERE execution_id = ? ORDER BY id",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LogEntry {
                    timestamp: row.try_get("timestamp")?,
                    level: row.try_get("level")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }

    async fn request_cancel(&self, execution_id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE executions SET cancel_requested = 1 WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_cancel_requested(&self, execution_id: i64) -> SchedulerResult<bool> {
        let requested =
            sqlx::query_scalar::<_, bool>("SELECT cancel_requested FROM executions WHERE id = ?")
                .bind(execution_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(requested.unwrap_or(false))
    }
}
