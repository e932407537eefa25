use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::condition::ConditionGroup;
use crate::Error;

pub type JsonMap = serde_json::Map<String, Value>;

/// Business events that can start a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Optin,
    Purchase,
    PageView,
    TagAdded,
    TagRemoved,
    FormSubmit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Optin => "OPTIN",
            EventKind::Purchase => "PURCHASE",
            EventKind::PageView => "PAGE_VIEW",
            EventKind::TagAdded => "TAG_ADDED",
            EventKind::TagRemoved => "TAG_REMOVED",
            EventKind::FormSubmit => "FORM_SUBMIT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "OPTIN" => Ok(EventKind::Optin),
            "PURCHASE" => Ok(EventKind::Purchase),
            "PAGE_VIEW" => Ok(EventKind::PageView),
            "TAG_ADDED" => Ok(EventKind::TagAdded),
            "TAG_REMOVED" => Ok(EventKind::TagRemoved),
            "FORM_SUBMIT" => Ok(EventKind::FormSubmit),
            _ => Err(Error::Validation(format!("Invalid event kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl fmt::Display for DefinitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionStatus::Draft => write!(f, "draft"),
            DefinitionStatus::Active => write!(f, "active"),
            DefinitionStatus::Paused => write!(f, "paused"),
            DefinitionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for DefinitionStatus {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "draft" => Ok(DefinitionStatus::Draft),
            "active" => Ok(DefinitionStatus::Active),
            "paused" => Ok(DefinitionStatus::Paused),
            "archived" => Ok(DefinitionStatus::Archived),
            _ => Err(Error::Validation(format!("Invalid workflow status: {}", s))),
        }
    }
}

/// An authored automation: one trigger and a linked chain of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: Uuid,

    /// Owning tenant; events only reach workflows of their own tenant
    pub tenant_id: String,

    #[serde(default)]
    pub name: String,

    pub trigger: Trigger,

    #[serde(default)]
    pub status: DefinitionStatus,

    /// Bumped by the store whenever the step collection changes
    #[serde(default)]
    pub version: i64,

    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step an execution starts at: lowest position, first declared on ties.
    pub fn entry_step(&self) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .enumerate()
            .min_by_key(|(idx, s)| (s.position, *idx))
            .map(|(_, s)| s)
    }

    pub fn is_active(&self) -> bool {
        self.status == DefinitionStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub kind: EventKind,

    /// Optional field-equality filter over the event data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<TriggerPredicate>,
}

/// Every entry must equal the value found at that (dotted) path in the event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TriggerPredicate {
    #[serde(default)]
    pub equals: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Display ordering; execution follows `next_step_id`
    #[serde(default)]
    pub position: i32,

    /// Successor in the chain; `None` ends the execution after this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,

    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    SendMessage(SendMessageConfig),
    Delay(DelayConfig),
    Condition(ConditionConfig),
    AddTag(TagConfig),
    RemoveTag(TagConfig),
    UpdateContact(UpdateContactConfig),
    Webhook(WebhookConfig),
    StartWorkflow(StartWorkflowConfig),
    End,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::SendMessage(_) => "SEND_MESSAGE",
            StepKind::Delay(_) => "DELAY",
            StepKind::Condition(_) => "CONDITION",
            StepKind::AddTag(_) => "ADD_TAG",
            StepKind::RemoveTag(_) => "REMOVE_TAG",
            StepKind::UpdateContact(_) => "UPDATE_CONTACT",
            StepKind::Webhook(_) => "WEBHOOK",
            StepKind::StartWorkflow(_) => "START_WORKFLOW",
            StepKind::End => "END",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageConfig {
    /// Template reference understood by the messaging service
    pub template: String,

    /// Extra merge data; string values are rendered against the execution data
    #[serde(default)]
    pub data: JsonMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub value: u32,
    pub unit: DelayUnit,
}

/// Longest wait a DELAY step may declare
pub const MAX_DELAY_DAYS: i64 = 3650;

impl DelayConfig {
    pub fn duration(&self) -> chrono::Duration {
        let value = i64::from(self.value);
        match self.unit {
            DelayUnit::Minutes => chrono::Duration::minutes(value),
            DelayUnit::Hours => chrono::Duration::hours(value),
            DelayUnit::Days => chrono::Duration::days(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    /// Evaluated in order; the first matching branch wins
    pub branches: Vec<ConditionBranch>,

    /// Taken when no branch matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_step_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBranch {
    pub when: ConditionGroup,
    pub next_step_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateContactConfig {
    pub fields: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Overrides the engine-wide webhook timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Data bag key that receives the parsed response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_response_as: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowConfig {
    pub workflow_id: Uuid,
}
