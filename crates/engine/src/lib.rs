pub mod clients;
pub mod clock;
pub mod config;
pub mod definition;
pub mod metrics;
pub mod server;
pub mod store;
pub mod template;
pub mod workflow;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Workflow {workflow_id} already has an active execution for subject {subject_id}")]
    AlreadyActive { workflow_id: Uuid, subject_id: String },
    #[error("Lease on execution {0} is no longer held")]
    LeaseLost(Uuid),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use definition::{EventKind, WorkflowDefinition, WorkflowStep};
pub use store::{Execution, ExecutionStatus};
pub use workflow::{Event, WorkflowEngine};
