use serde_json::Value;
use uuid::Uuid;

use crate::{definition::JsonMap, store::Execution};

/// The view of an execution handed to the step interpreter.
///
/// Only `data` is mutable; every other change goes back to the scheduler as
/// a `Transition`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: String,
    pub subject_id: String,
    pub depth: u32,
    pub data: JsonMap,
}

impl ExecutionContext {
    pub fn from_execution(execution: &Execution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            tenant_id: execution.tenant_id.clone(),
            subject_id: execution.subject_id.clone(),
            depth: execution.depth,
            data: execution.data.clone(),
        }
    }

    pub fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Merge values into the data bag, overwriting existing keys
    pub fn merge(&mut self, fields: JsonMap) {
        self.data.extend(fields);
    }

    /// The data bag plus the identifiers templates may refer to
    pub fn template_context(&self) -> Value {
        let mut context = self.data.clone();
        context.insert("subjectId".to_string(), Value::String(self.subject_id.clone()));
        context.insert("tenantId".to_string(), Value::String(self.tenant_id.clone()));
        context.insert("executionId".to_string(), Value::String(self.execution_id.to_string()));
        context.insert("workflowId".to_string(), Value::String(self.workflow_id.to_string()));
        Value::Object(context)
    }
}
