mod config;
mod factory;
mod models;
mod sqlite;

pub use config::DatabaseConfig;
pub use factory::create_store;
pub use models::*;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::definition::{DefinitionStatus, EventKind, WorkflowDefinition};

/// Durable state shared by every worker.
///
/// Writes to an execution go through the worker holding its lease: the
/// `worker_id` arguments are checked against the stored claim and a mismatch
/// surfaces as `Error::LeaseLost`.
#[async_trait]
pub trait Store: Send + Sync {
    // Initialize database schema
    async fn init(&self) -> crate::Result<()>;

    // Workflow definitions
    async fn save_definition(&self, definition: WorkflowDefinition) -> crate::Result<WorkflowDefinition>;
    async fn get_definition(&self, id: Uuid) -> crate::Result<Option<WorkflowDefinition>>;
    async fn list_active_definitions(&self, tenant_id: &str, kind: EventKind) -> crate::Result<Vec<WorkflowDefinition>>;
    async fn update_definition_status(&self, id: Uuid, status: DefinitionStatus) -> crate::Result<()>;

    // Execution operations

    /// Insert a new execution. Fails with `Error::AlreadyActive` when the
    /// (workflow, subject) pair already has a RUNNING or WAITING execution;
    /// the check and the insert are one statement.
    async fn create_execution(&self, execution: &Execution) -> crate::Result<()>;
    async fn get_execution(&self, id: Uuid) -> crate::Result<Option<Execution>>;
    async fn get_active_execution(&self, workflow_id: Uuid, subject_id: &str) -> crate::Result<Option<Execution>>;
    async fn list_executions(&self, workflow_id: Uuid, limit: i64, offset: i64) -> crate::Result<Vec<Execution>>;
    async fn cancel_execution(&self, id: Uuid, now: DateTime<Utc>) -> crate::Result<Execution>;

    // Lease operations
    async fn claim_runnable(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> crate::Result<Vec<Execution>>;

    /// True while `worker_id` holds an unexpired lease on a RUNNING execution
    async fn still_owned(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> crate::Result<bool>;
    async fn save_progress(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> crate::Result<()>;
    async fn suspend_execution(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        resume_at: DateTime<Utc>,
    ) -> crate::Result<()>;
    async fn finish_execution(&self, execution: &Execution, worker_id: &str, now: DateTime<Utc>) -> crate::Result<()>;
    async fn release_claim(&self, id: Uuid, worker_id: &str) -> crate::Result<()>;

    // Timer operations
    async fn schedule_resume(&self, execution_id: Uuid, resume_at: DateTime<Utc>) -> crate::Result<()>;
    async fn poll_due(&self, now: DateTime<Utc>) -> crate::Result<Vec<Uuid>>;

    /// Move a due WAITING execution back to RUNNING. Returns false if it was
    /// not due, no longer waiting, or already resumed by someone else.
    async fn resume_execution(&self, execution_id: Uuid, now: DateTime<Utc>) -> crate::Result<bool>;
    async fn pending_timers(&self) -> crate::Result<Vec<(Uuid, DateTime<Utc>)>>;
}
