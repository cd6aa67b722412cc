use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use jobsched_core::{
    models::{Trigger, TriggerFireUpdate},
    traits::TriggerRepository,
    SchedulerError, SchedulerResult,
};

pub struct SqliteTriggerRepository {
    pool: SqlitePool,
}

impl SqliteTriggerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_trigger(row: &SqliteRow) -> SchedulerResult<Trigger> {
        Ok(Trigger {
            id: row.try_get("id")?,
            job_definition_id: row.try_get("job_definition_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            cron_expression: row.try_get("cron_expression")?,
            enabled: row.try_get("enabled")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            timezone: row.try_get("timezone")?,
            priority: row.try_get("priority")?,
            misfire_policy: row.try_get("misfire_policy")?,
            claim_owner: row.try_get("claim_owner")?,
            claim_expiry: row.try_get("claim_expiry")?,
            last_fire_time: row.try_get("last_fire_time")?,
            next_fire_time: row.try_get("next_fire_time")?,
            fire_count: row.try_get("fire_count")?,
            max_fire_count: row.try_get("max_fire_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT t.id, t.job_definition_id, t.name, t.description, \
     t.cron_expression, t.enabled, t.start_time, t.end_time, t.timezone, t.priority, \
     t.misfire_policy, t.claim_owner, t.claim_expiry, t.last_fire_time, t.next_fire_time, \
     t.fire_count, t.max_fire_count, t.created_at, t.updated_at FROM triggers t";

#[async_trait]
impl TriggerRepository for SqliteTriggerRepository {
    #[instrument(skip(self, trigger), fields(name = %trigger.name))]
    async fn create(&self, trigger: &Trigger) -> SchedulerResult<Trigger> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO triggers (
                job_definition_id, name, description, cron_expression, enabled, start_time,
                end_time, timezone, priority, misfire_policy, last_fire_time, next_fire_time,
                fire_count, max_fire_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(trigger.job_definition_id)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(&trigger.cron_expression)
        .bind(trigger.enabled)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(&trigger.timezone)
        .bind(trigger.priority)
        .bind(trigger.misfire_policy)
        .bind(trigger.last_fire_time)
        .bind(trigger.next_fire_time)
        .bind(trigger.fire_count)
        .bind(trigger.max_fire_count)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                SchedulerError::definition_not_found(trigger.job_definition_id)
            }
            _ => SchedulerError::Database(e),
        })?;

        let mut created = trigger.clone();
        created.id = row.try_get("id")?;
        created.claim_owner = None;
        created.claim_expiry = None;
        created.created_at = now;
        created.updated_at = now;
        debug!("创建触发器: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Trigger>> {
        let row = sqlx::query(&format!("{} WHERE t.id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_trigger).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<Trigger>> {
        let rows = sqlx::query(&format!("{} ORDER BY t.id", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn list_by_definition(&self, job_definition_id: i64) -> SchedulerResult<Vec<Trigger>> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.job_definition_id = ? ORDER BY t.id",
            SELECT_COLUMNS
        ))
        .bind(job_definition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    #[instrument(skip(self, trigger), fields(id = trigger.id))]
    async fn update(&self, trigger: &Trigger) -> SchedulerResult<Trigger> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET job_definition_id = ?, name = ?, description = ?, cron_expression = ?,
                enabled = ?, start_time = ?, end_time = ?, timezone = ?, priority = ?,
                misfire_policy = ?, max_fire_count = ?, next_fire_time = ?,
                claim_owner = NULL, claim_expiry = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(trigger.job_definition_id)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(&trigger.cron_expression)
        .bind(trigger.enabled)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(&trigger.timezone)
        .bind(trigger.priority)
        .bind(trigger.misfire_policy)
        .bind(trigger.max_fire_count)
        .bind(trigger.next_fire_time)
        .bind(Utc::now())
        .bind(trigger.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::trigger_not_found(trigger.id));
        }

        self.get_by_id(trigger.id)
            .await?
            .ok_or_else(|| SchedulerError::trigger_not_found(trigger.id))
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64> {
        let result = sqlx::query("DELETE FROM triggers WHERE job_definition_id = ?")
            .bind(job_definition_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Trigger>> {
        let rows = sqlx::query(&format!(
            r#"{}
            JOIN job_definitions d ON d.id = t.job_definition_id
            WHERE t.enabled = 1 AND d.enabled = 1
              AND t.next_fire_time IS NOT NULL AND t.next_fire_time <= ?
            ORDER BY t.priority DESC, t.next_fire_time ASC, t.id ASC
            LIMIT ?"#,
            SELECT_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn try_claim(
        &self,
        trigger_id: i64,
        node_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET claim_owner = ?, claim_expiry = ?
            WHERE id = ?
              AND (claim_owner IS NULL OR claim_expiry IS NULL OR claim_expiry <= ?)
            "#,
        )
        .bind(node_id)
        .bind(lease_until)
        .bind(trigger_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_fire(
        &self,
        trigger_id: i64,
        node_id: &str,
        update: &TriggerFireUpdate,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET last_fire_time = ?, next_fire_time = ?, fire_count = ?, enabled = ?,
                claim_owner = NULL, claim_expiry = NULL, updated_at = ?
            WHERE id = ? AND claim_owner = ?
            "#,
        )
        .bind(update.last_fire_time)
        .bind(update.next_fire_time)
        .bind(update.fire_count)
        .bind(update.enabled)
        .bind(Utc::now())
        .bind(trigger_id)
        .bind(node_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, trigger_id: i64, node_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE triggers SET claim_owner = NULL, claim_expiry = NULL WHERE id = ? AND claim_owner = ?",
        )
        .bind(trigger_id)
        .bind(node_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
