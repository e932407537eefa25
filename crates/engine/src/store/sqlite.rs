use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::{ActivityLog, SubjectDirectory},
    definition::{self, DefinitionStatus, EventKind, JsonMap, WorkflowDefinition},
    store::{ActivityRecord, Execution, ExecutionStatus, Store},
    Error, Result,
};

const EXECUTION_COLUMNS: &str = r#"
    id, workflow_id, workflow_version, tenant_id, subject_id, status,
    current_step_id, data, resume_at_ms, error, parent_execution_id, depth,
    claimed_by, claimed_until_ms, started_at, completed_at, updated_at
"#;

const DEFINITION_COLUMNS: &str = r#"
    id, tenant_id, name, trigger_json, status, version, steps_json
"#;

const UPSERT_RESUME_TIMER: &str = r#"
    INSERT INTO resume_timers (execution_id, resume_at_ms) VALUES (?1, ?2)
    ON CONFLICT(execution_id) DO UPDATE SET resume_at_ms = excluded.resume_at_ms
"#;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self> {
        info!("Connecting to SQLite database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to connect to SQLite: {}", e);
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }

    /// A private database that lives as long as the store. Backed by a single
    /// connection that is never recycled, since closing it drops the data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn list_tags(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT tag FROM subject_tags WHERE tenant_id = ?1 AND subject_id = ?2 ORDER BY tag",
        )
        .bind(tenant_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("tag").map_err(Error::from))
            .collect()
    }

    pub async fn get_fields(&self, tenant_id: &str, subject_id: &str) -> Result<JsonMap> {
        let rows = sqlx::query(
            "SELECT field, value FROM subject_fields WHERE tenant_id = ?1 AND subject_id = ?2",
        )
        .bind(tenant_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        let mut fields = JsonMap::new();
        for r in rows {
            let value: String = r.try_get("value")?;
            fields.insert(r.try_get("field")?, serde_json::from_str(&value)?);
        }
        Ok(fields)
    }

    pub async fn list_activities(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<ActivityRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, subject_id, kind, description, metadata, created_at
            FROM activities
            WHERE tenant_id = ?1 AND subject_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(tenant_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            let metadata: String = r.try_get("metadata")?;
            records.push(ActivityRecord {
                id: r.try_get::<String, _>("id")?.parse()?,
                tenant_id: r.try_get("tenant_id")?,
                subject_id: r.try_get("subject_id")?,
                kind: r.try_get::<String, _>("kind")?.parse()?,
                description: r.try_get("description")?,
                metadata: serde_json::from_str(&metadata)?,
                created_at: r.try_get("created_at")?,
            });
        }
        Ok(records)
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn execution_from_row(r: &SqliteRow) -> Result<Execution> {
    let data: String = r.try_get("data")?;
    let data: JsonMap = serde_json::from_str(&data)?;

    Ok(Execution {
        id: r.try_get::<String, _>("id")?.parse()?,
        workflow_id: r.try_get::<String, _>("workflow_id")?.parse()?,
        workflow_version: r.try_get("workflow_version")?,
        tenant_id: r.try_get("tenant_id")?,
        subject_id: r.try_get("subject_id")?,
        status: r.try_get::<String, _>("status")?.parse()?,
        current_step_id: r.try_get("current_step_id")?,
        data,
        resume_at: from_millis(r.try_get("resume_at_ms")?),
        error: r.try_get("error")?,
        parent_execution_id: r
            .try_get::<Option<String>, _>("parent_execution_id")?
            .map(|s| s.parse())
            .transpose()?,
        depth: u32::try_from(r.try_get::<i64, _>("depth")?).unwrap_or(0),
        claimed_by: r.try_get("claimed_by")?,
        claimed_until: from_millis(r.try_get("claimed_until_ms")?),
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn definition_from_row(r: &SqliteRow) -> Result<WorkflowDefinition> {
    let trigger: String = r.try_get("trigger_json")?;
    let steps: String = r.try_get("steps_json")?;

    Ok(WorkflowDefinition {
        id: r.try_get::<String, _>("id")?.parse()?,
        tenant_id: r.try_get("tenant_id")?,
        name: r.try_get("name")?,
        trigger: serde_json::from_str(&trigger)?,
        status: r.try_get::<String, _>("status")?.parse()?,
        version: r.try_get("version")?,
        steps: serde_json::from_str(&steps)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                Error::Migrate(e)
            })?;

        Ok(())
    }

    // Workflow definitions
    async fn save_definition(&self, mut definition: WorkflowDefinition) -> Result<WorkflowDefinition> {
        debug!("Saving workflow definition: {}", definition.id);

        definition::validate(&definition)?;

        let steps_json = serde_json::to_string(&definition.steps)?;
        let trigger_json = serde_json::to_string(&definition.trigger)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT version, steps_json FROM workflow_definitions WHERE id = ?1")
            .bind(definition.id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        definition.version = match existing {
            Some(row) => {
                let version: i64 = row.try_get("version")?;
                let previous_steps: String = row.try_get("steps_json")?;
                if previous_steps != steps_json {
                    version + 1
                } else {
                    version
                }
            }
            None => definition.version.max(1),
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (
                id, tenant_id, name, trigger_kind, trigger_json, status, version,
                steps_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                trigger_kind = excluded.trigger_kind,
                trigger_json = excluded.trigger_json,
                status = excluded.status,
                version = excluded.version,
                steps_json = excluded.steps_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(definition.id.to_string())
        .bind(&definition.tenant_id)
        .bind(&definition.name)
        .bind(definition.trigger.kind.to_string())
        .bind(trigger_json)
        .bind(definition.status.to_string())
        .bind(definition.version)
        .bind(steps_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(definition)
    }

    async fn get_definition(&self, id: Uuid) -> Result<Option<WorkflowDefinition>> {
        debug!("Getting workflow definition: {}", id);

        let row = sqlx::query(&format!(
            "SELECT {} FROM workflow_definitions WHERE id = ?1",
            DEFINITION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(definition_from_row).transpose()
    }

    async fn list_active_definitions(&self, tenant_id: &str, kind: EventKind) -> Result<Vec<WorkflowDefinition>> {
        debug!("Listing active definitions: tenant={}, kind={}", tenant_id, kind);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM workflow_definitions
            WHERE tenant_id = ?1 AND trigger_kind = ?2 AND status = ?3
            ORDER BY created_at
            "#,
            DEFINITION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(kind.to_string())
        .bind(DefinitionStatus::Active.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(definition_from_row).collect()
    }

    async fn update_definition_status(&self, id: Uuid, status: DefinitionStatus) -> Result<()> {
        debug!("Updating definition status: {} -> {}", id, status);

        let result = sqlx::query(
            "UPDATE workflow_definitions SET status = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("workflow {}", id)));
        }
        Ok(())
    }

    // Execution operations
    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        debug!("Creating execution: {}", execution.id);

        // OR IGNORE turns a hit on idx_executions_one_active into zero rows
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO executions (
                id, workflow_id, workflow_version, tenant_id, subject_id, status,
                current_step_id, data, resume_at_ms, error, parent_execution_id, depth,
                claimed_by, claimed_until_ms, started_at, completed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.workflow_version)
        .bind(&execution.tenant_id)
        .bind(&execution.subject_id)
        .bind(execution.status.to_string())
        .bind(&execution.current_step_id)
        .bind(serde_json::to_string(&execution.data)?)
        .bind(execution.resume_at.map(to_millis))
        .bind(&execution.error)
        .bind(execution.parent_execution_id.map(|id| id.to_string()))
        .bind(i64::from(execution.depth))
        .bind(&execution.claimed_by)
        .bind(execution.claimed_until.map(to_millis))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AlreadyActive {
                workflow_id: execution.workflow_id,
                subject_id: execution.subject_id.clone(),
            });
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        let row = sqlx::query(&format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn get_active_execution(&self, workflow_id: Uuid, subject_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM executions
            WHERE workflow_id = ?1 AND subject_id = ?2 AND status IN ('running', 'waiting')
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id.to_string())
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(&self, workflow_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Execution>> {
        debug!("Listing executions: workflow={}, limit={}, offset={}", workflow_id, limit, offset);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM executions
            WHERE workflow_id = ?1
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn cancel_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<Execution> {
        debug!("Canceling execution: {}", id);

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'canceled', completed_at = ?1, updated_at = ?1,
                resume_at_ms = NULL, claimed_by = NULL, claimed_until_ms = NULL
            WHERE id = ?2 AND status IN ('running', 'waiting')
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_execution(id).await? {
                Some(existing) => Err(Error::InvalidState(format!(
                    "execution {} is already {}",
                    id, existing.status
                ))),
                None => Err(Error::NotFound(format!("execution {}", id))),
            };
        }

        sqlx::query("DELETE FROM resume_timers WHERE execution_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_execution(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {}", id)))
    }

    // Lease operations
    async fn claim_runnable(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>> {
        let candidates = sqlx::query(
            r#"
            SELECT id FROM executions
            WHERE status = 'running' AND (claimed_until_ms IS NULL OR claimed_until_ms < ?1)
            ORDER BY updated_at
            LIMIT ?2
            "#,
        )
        .bind(to_millis(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = Vec::new();
        for row in candidates {
            let id: String = row.try_get("id")?;

            // Another worker may have won the race since the select
            let result = sqlx::query(
                r#"
                UPDATE executions SET claimed_by = ?1, claimed_until_ms = ?2
                WHERE id = ?3 AND status = 'running'
                  AND (claimed_until_ms IS NULL OR claimed_until_ms < ?4)
                "#,
            )
            .bind(worker_id)
            .bind(to_millis(lease_until))
            .bind(&id)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                if let Some(execution) = self.get_execution(id.parse()?).await? {
                    claimed.push(execution);
                }
            }
        }

        if !claimed.is_empty() {
            debug!("Worker {} claimed {} executions", worker_id, claimed.len());
        }
        Ok(claimed)
    }

    async fn still_owned(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM executions
            WHERE id = ?1 AND status = 'running' AND claimed_by = ?2 AND claimed_until_ms >= ?3
            "#,
        )
        .bind(id.to_string())
        .bind(worker_id)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn save_progress(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET current_step_id = ?1, data = ?2, claimed_until_ms = ?3, updated_at = ?4
            WHERE id = ?5 AND status = 'running' AND claimed_by = ?6
            "#,
        )
        .bind(&execution.current_step_id)
        .bind(serde_json::to_string(&execution.data)?)
        .bind(to_millis(lease_until))
        .bind(now)
        .bind(execution.id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::LeaseLost(execution.id));
        }
        Ok(())
    }

    async fn suspend_execution(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        resume_at: DateTime<Utc>,
    ) -> Result<()> {
        debug!("Suspending execution {} until {}", execution.id, resume_at);

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'waiting', current_step_id = ?1, data = ?2, resume_at_ms = ?3,
                claimed_by = NULL, claimed_until_ms = NULL, updated_at = ?4
            WHERE id = ?5 AND status = 'running' AND claimed_by = ?6
            "#,
        )
        .bind(&execution.current_step_id)
        .bind(serde_json::to_string(&execution.data)?)
        .bind(to_millis(resume_at))
        .bind(now)
        .bind(execution.id.to_string())
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::LeaseLost(execution.id));
        }

        sqlx::query(UPSERT_RESUME_TIMER)
        .bind(execution.id.to_string())
        .bind(to_millis(resume_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finish_execution(&self, execution: &Execution, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        debug!("Finishing execution {} as {}", execution.id, execution.status);

        if !execution.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "cannot finish execution {} as {}",
                execution.id, execution.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?1, current_step_id = ?2, data = ?3, error = ?4, completed_at = ?5,
                resume_at_ms = NULL, claimed_by = NULL, claimed_until_ms = NULL, updated_at = ?6
            WHERE id = ?7 AND status = 'running' AND claimed_by = ?8
            "#,
        )
        .bind(execution.status.to_string())
        .bind(&execution.current_step_id)
        .bind(serde_json::to_string(&execution.data)?)
        .bind(&execution.error)
        .bind(execution.completed_at)
        .bind(now)
        .bind(execution.id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::LeaseLost(execution.id));
        }
        Ok(())
    }

    async fn release_claim(&self, id: Uuid, worker_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE executions SET claimed_by = NULL, claimed_until_ms = NULL
            WHERE id = ?1 AND claimed_by = ?2
            "#,
        )
        .bind(id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Timer operations
    async fn schedule_resume(&self, execution_id: Uuid, resume_at: DateTime<Utc>) -> Result<()> {
        debug!("Scheduling resume of {} at {}", execution_id, resume_at);

        sqlx::query(UPSERT_RESUME_TIMER)
        .bind(execution_id.to_string())
        .bind(to_millis(resume_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn poll_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT t.execution_id FROM resume_timers t
            JOIN executions e ON e.id = t.execution_id
            WHERE t.resume_at_ms <= ?1 AND e.status = 'waiting'
            ORDER BY t.resume_at_ms
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<Uuid> { Ok(r.try_get::<String, _>("execution_id")?.parse()?) })
            .collect()
    }

    async fn resume_execution(&self, execution_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let due = sqlx::query("SELECT 1 FROM resume_timers WHERE execution_id = ?1 AND resume_at_ms <= ?2")
            .bind(execution_id.to_string())
            .bind(to_millis(now))
            .fetch_optional(&mut *tx)
            .await?;

        if due.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'running', resume_at_ms = NULL, updated_at = ?1
            WHERE id = ?2 AND status = 'waiting'
            "#,
        )
        .bind(now)
        .bind(execution_id.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM resume_timers WHERE execution_id = ?1")
            .bind(execution_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_timers(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
        let rows = sqlx::query(
            r#"
            SELECT t.execution_id, t.resume_at_ms FROM resume_timers t
            JOIN executions e ON e.id = t.execution_id
            WHERE e.status = 'waiting'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut timers = Vec::with_capacity(rows.len());
        for r in rows {
            let id: Uuid = r.try_get::<String, _>("execution_id")?.parse()?;
            if let Some(at) = from_millis(Some(r.try_get("resume_at_ms")?)) {
                timers.push((id, at));
            }
        }
        Ok(timers)
    }
}

#[async_trait]
impl SubjectDirectory for SqliteStore {
    async fn add_tag(&self, tenant_id: &str, subject_id: &str, tag: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subject_tags (tenant_id, subject_id, tag, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(tenant_id)
        .bind(subject_id)
        .bind(tag)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_tag(&self, tenant_id: &str, subject_id: &str, tag: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM subject_tags WHERE tenant_id = ?1 AND subject_id = ?2 AND tag = ?3",
        )
        .bind(tenant_id)
        .bind(subject_id)
        .bind(tag)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_fields(&self, tenant_id: &str, subject_id: &str, fields: &JsonMap) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (field, value) in fields {
            sqlx::query(
                r#"
                INSERT INTO subject_fields (tenant_id, subject_id, field, value, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(tenant_id, subject_id, field) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(tenant_id)
            .bind(subject_id)
            .bind(field)
            .bind(serde_json::to_string(value)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityLog for SqliteStore {
    async fn append(&self, record: ActivityRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, tenant_id, subject_id, kind, description, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.tenant_id)
        .bind(&record.subject_id)
        .bind(record.kind.to_string())
        .bind(&record.description)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
