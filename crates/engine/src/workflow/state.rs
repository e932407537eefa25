use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// What the scheduler should do after a step has run.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move to the step's successor; `None` ends the execution
    Advance(Option<String>),
    /// Jump to a step chosen by a condition
    Branch(String),
    /// Park the execution until `resume_at`, then continue at `next_step_id`
    Suspend {
        resume_at: DateTime<Utc>,
        next_step_id: Option<String>,
    },
    Fail(StepError),
    Complete,
}

/// Failures that end an execution. The rendered message is stored on the
/// execution record as is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("no branch of condition step '{step_id}' matched and no default step is set")]
    NoMatchingBranch { step_id: String },

    #[error("{}", webhook_message(.status, .detail))]
    Webhook { status: Option<u16>, detail: String },

    #[error("step '{step_id}' does not exist in workflow {workflow_id}")]
    MissingStep { workflow_id: Uuid, step_id: String },

    #[error("workflow {0} does not exist")]
    DefinitionNotFound(Uuid),

    #[error("workflow chain depth {depth} exceeds the limit of {max}")]
    ChainDepthExceeded { depth: u32, max: u32 },

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("delay step '{step_id}' resumes beyond the supported time range")]
    DelayOutOfRange { step_id: String },
}

fn webhook_message(status: &Option<u16>, detail: &str) -> String {
    match status {
        Some(status) => format!("webhook returned HTTP {}: {}", status, detail),
        None => format!("webhook request failed: {}", detail),
    }
}
