use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{definition::JsonMap, Error, Result};

/// One run of a workflow definition for one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: i64,
    pub tenant_id: String,
    pub subject_id: String,
    pub status: ExecutionStatus,

    /// Next step to run; `None` once the chain has been walked to its end
    pub current_step_id: Option<String>,

    /// Event payload merged with step side effects
    pub data: JsonMap,

    pub resume_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    /// Set when started by another execution's START_WORKFLOW step
    pub parent_execution_id: Option<Uuid>,
    pub depth: u32,

    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn data_value(&self) -> JsonValue {
        JsonValue::Object(self.data.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    /// RUNNING and WAITING count against the one-live-execution rule
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Waiting)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Waiting => write!(f, "waiting"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "waiting" => Ok(ExecutionStatus::Waiting),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "canceled" => Ok(ExecutionStatus::Canceled),
            _ => Err(Error::Config(format!("Invalid execution status: {}", s))),
        }
    }
}

/// Append-only log entry attached to a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub subject_id: String,
    pub kind: ActivityKind,
    pub description: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        subject_id: impl Into<String>,
        kind: ActivityKind,
        description: impl Into<String>,
        metadata: JsonValue,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            subject_id: subject_id.into(),
            kind,
            description: description.into(),
            metadata,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCanceled,
    TagAdded,
    TagRemoved,
    ContactUpdated,
    MessageSent,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityKind::WorkflowStarted => "workflow_started",
            ActivityKind::WorkflowCompleted => "workflow_completed",
            ActivityKind::WorkflowFailed => "workflow_failed",
            ActivityKind::WorkflowCanceled => "workflow_canceled",
            ActivityKind::TagAdded => "tag_added",
            ActivityKind::TagRemoved => "tag_removed",
            ActivityKind::ContactUpdated => "contact_updated",
            ActivityKind::MessageSent => "message_sent",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "workflow_started" => Ok(ActivityKind::WorkflowStarted),
            "workflow_completed" => Ok(ActivityKind::WorkflowCompleted),
            "workflow_failed" => Ok(ActivityKind::WorkflowFailed),
            "workflow_canceled" => Ok(ActivityKind::WorkflowCanceled),
            "tag_added" => Ok(ActivityKind::TagAdded),
            "tag_removed" => Ok(ActivityKind::TagRemoved),
            "contact_updated" => Ok(ActivityKind::ContactUpdated),
            "message_sent" => Ok(ActivityKind::MessageSent),
            _ => Err(Error::Config(format!("Invalid activity kind: {}", s))),
        }
    }
}
