use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use jobsched_core::{
    models::{JobDefinition, JobParameters},
    traits::{DefinitionStateUpdate, JobDefinitionRepository},
    SchedulerError, SchedulerResult,
};

pub struct SqliteJobDefinitionRepository {
    pool: SqlitePool,
}

impl SqliteJobDefinitionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_definition(row: &SqliteRow) -> SchedulerResult<JobDefinition> {
        let parameters: String = row.try_get("parameters")?;
        Ok(JobDefinition {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            job_type: row.try_get("job_type")?,
            enabled: row.try_get("enabled")?,
            status: row.try_get("status")?,
            last_start_time: row.try_get("last_start_time")?,
            last_end_time: row.try_get("last_end_time")?,
            last_result: row.try_get("last_result")?,
            retry_count: row.try_get("retry_count")?,
            max_retry_count: row.try_get("max_retry_count")?,
            parameters: JobParameters::from_json(&parameters)?,
            log_level: row.try_get("log_level")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// 唯一约束冲突转换为 `Conflict`
fn map_unique_violation(err: sqlx::Error, code: &str) -> SchedulerError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            SchedulerError::Conflict(format!("作业定义编码已存在: {}", code))
        }
        _ => SchedulerError::Database(err),
    }
}

const SELECT_COLUMNS: &str = "SELECT id, code, name, description, job_type, enabled, status, \
     last_start_time, last_end_time, last_result, retry_count, max_retry_count, parameters, \
     log_level, created_at, updated_at FROM job_definitions";

#[async_trait]
impl JobDefinitionRepository for SqliteJobDefinitionRepository {
    #[instrument(skip(self, definition), fields(code = %definition.code))]
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO job_definitions (
                code, name, description, job_type, enabled, status, last_start_time,
                last_end_time, last_result, retry_count, max_retry_count, parameters,
                log_level, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&definition.code)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&definition.job_type)
        .bind(definition.enabled)
        .bind(definition.status)
        .bind(definition.last_start_time)
        .bind(definition.last_end_time)
        .bind(&definition.last_result)
        .bind(definition.retry_count)
        .bind(definition.max_retry_count)
        .bind(definition.parameters.to_json()?)
        .bind(definition.log_level)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &definition.code))?;

        let mut created = definition.clone();
        created.id = row.try_get("id")?;
        created.created_at = now;
        created.updated_at = now;
        debug!("创建作业定义: {} (ID: {})", created.code, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobDefinition>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_definition).transpose()
    }

    async fn get_by_code(&self, code: &str) -> SchedulerResult<Option<JobDefinition>> {
        let row = sqlx::query(&format!("{} WHERE code = ?", SELECT_COLUMNS))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_definition).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_definition).collect()
    }

    #[instrument(skip(self, definition), fields(id = definition.id))]
    async fn update(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let result = sqlx::query(
            r#"
            UPDATE job_definitions
            SET code = ?, name = ?, description = ?, job_type = ?, enabled = ?,
                parameters = ?, log_level = ?, max_retry_count = ?,
                retry_count = MIN(retry_count, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&definition.code)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(&definition.job_type)
        .bind(definition.enabled)
        .bind(definition.parameters.to_json()?)
        .bind(definition.log_level)
        .bind(definition.max_retry_count)
        .bind(definition.max_retry_count)
        .bind(Utc::now())
        .bind(definition.id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &definition.code))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::definition_not_found(definition.id));
        }

        self.get_by_id(definition.id)
            .await?
            .ok_or_else(|| SchedulerError::definition_not_found(definition.id))
    }

    async fn update_state(&self, id: i64, update: &DefinitionStateUpdate) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_definitions
            SET status = COALESCE(?, status),
                last_start_time = COALESCE(?, last_start_time),
                last_end_time = COALESCE(?, last_end_time),
                last_result = COALESCE(?, last_result),
                retry_count = COALESCE(?, retry_count),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status)
        .bind(update.last_start_time)
        .bind(update.last_end_time)
        .bind(&update.last_result)
        .bind(update.retry_count)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::definition_not_found(id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM job_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
