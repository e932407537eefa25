pub mod loader;
pub mod validation;
pub mod workflow;

pub use loader::{load_definitions, parse_definitions};
pub use validation::validate;
pub use workflow::{
    ConditionBranch, ConditionConfig, DefinitionStatus, DelayConfig, DelayUnit, EventKind,
    JsonMap, SendMessageConfig, StartWorkflowConfig, StepKind, TagConfig, Trigger,
    TriggerPredicate, UpdateContactConfig, WebhookConfig, WorkflowDefinition, WorkflowStep,
};
