use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::{append_activity, ActivityLog},
    clock::Clock,
    definition::{EventKind, JsonMap, TriggerPredicate, WorkflowDefinition},
    metrics,
    store::{ActivityKind, ActivityRecord, Execution, ExecutionStatus, Store},
    workflow::{condition, ExecutionContext},
    Error, Result,
};

/// A business event reported by the application layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    pub tenant_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub data: JsonMap,
}

/// Turns events into new executions.
pub struct TriggerDispatcher {
    store: Arc<dyn Store>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl TriggerDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            activity,
            clock,
            wake,
        }
    }

    /// Start every active workflow of the event's tenant whose trigger
    /// matches. Subjects that already have a live execution of a workflow
    /// are skipped for that workflow. A workflow whose launch fails is
    /// logged and skipped; the others still start.
    pub async fn dispatch(&self, event: &Event) -> Result<Vec<Uuid>> {
        debug!(
            "Dispatching {} event for subject {} (tenant {})",
            event.kind, event.subject_id, event.tenant_id
        );

        let candidates = self
            .store
            .list_active_definitions(&event.tenant_id, event.kind)
            .await?;

        let payload = Value::Object(event.data.clone());
        let mut created = Vec::new();

        for definition in candidates {
            if !predicate_matches(definition.trigger.predicate.as_ref(), &payload) {
                debug!("Workflow {} trigger predicate did not match", definition.id);
                continue;
            }

            match self
                .launch(&definition, &event.subject_id, event.data.clone(), None)
                .await
            {
                Ok(Some(id)) => created.push(id),
                Ok(None) => {}
                Err(e) => error!(
                    "Failed to start workflow {} for subject {}: {}",
                    definition.id, event.subject_id, e
                ),
            }
        }

        Ok(created)
    }

    /// Create a RUNNING execution at the workflow's entry step.
    ///
    /// Returns `None` when the subject already has a live execution of the
    /// workflow. `parent` is set when launched by a START_WORKFLOW step.
    pub async fn launch(
        &self,
        definition: &WorkflowDefinition,
        subject_id: &str,
        data: JsonMap,
        parent: Option<&ExecutionContext>,
    ) -> Result<Option<Uuid>> {
        let now = self.clock.now();
        let execution = Execution {
            id: Uuid::new_v4(),
            workflow_id: definition.id,
            workflow_version: definition.version,
            tenant_id: definition.tenant_id.clone(),
            subject_id: subject_id.to_string(),
            status: ExecutionStatus::Running,
            current_step_id: definition.entry_step().map(|s| s.id.clone()),
            data,
            resume_at: None,
            error: None,
            parent_execution_id: parent.map(|p| p.execution_id),
            depth: parent.map_or(0, |p| p.depth + 1),
            claimed_by: None,
            claimed_until: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
        };

        match self.store.create_execution(&execution).await {
            Ok(()) => {}
            Err(Error::AlreadyActive { .. }) => {
                info!(
                    "Skipping workflow {} for subject {}: execution already active",
                    definition.id, subject_id
                );
                metrics::DUPLICATES_SKIPPED_TOTAL.inc();
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        info!(
            "Started execution {} of workflow {} (v{}) for subject {}",
            execution.id, definition.id, definition.version, subject_id
        );
        metrics::EXECUTIONS_STARTED_TOTAL.inc();

        append_activity(
            self.activity.as_ref(),
            ActivityRecord::new(
                &execution.tenant_id,
                subject_id,
                ActivityKind::WorkflowStarted,
                format!("Workflow '{}' started", definition.name),
                json!({
                    "workflowId": definition.id,
                    "executionId": execution.id,
                    "parentExecutionId": execution.parent_execution_id,
                }),
                now,
            ),
        )
        .await;

        self.wake.notify_waiters();

        Ok(Some(execution.id))
    }
}

/// Every predicate entry must equal the value at its path in the event data.
pub fn predicate_matches(predicate: Option<&TriggerPredicate>, data: &Value) -> bool {
    let Some(predicate) = predicate else {
        return true;
    };

    predicate.equals.iter().all(|(path, expected)| {
        condition::lookup(data, path).map_or(false, |actual| condition::loose_eq(actual, expected))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clients::MockActivityLog, clock::MockClock, store::SqliteStore};
    use serde_json::json;

    fn predicate(value: Value) -> TriggerPredicate {
        serde_json::from_value(json!({ "equals": value })).unwrap()
    }

    #[test]
    fn test_missing_predicate_matches_everything() {
        assert!(predicate_matches(None, &json!({})));
    }

    #[test]
    fn test_predicate_field_equality() {
        let p = predicate(json!({ "formId": "newsletter", "source.campaign": "spring" }));

        assert!(predicate_matches(
            Some(&p),
            &json!({ "formId": "newsletter", "source": { "campaign": "spring" } })
        ));
        assert!(!predicate_matches(
            Some(&p),
            &json!({ "formId": "contact", "source": { "campaign": "spring" } })
        ));
        assert!(!predicate_matches(Some(&p), &json!({ "formId": "newsletter" })));
    }

    #[tokio::test]
    async fn test_duplicate_launch_is_skipped() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store.init().await.unwrap();

        let mut activity = MockActivityLog::new();
        activity
            .expect_append()
            .withf(|r| r.kind == ActivityKind::WorkflowStarted)
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = TriggerDispatcher::new(
            store.clone(),
            Arc::new(activity),
            Arc::new(MockClock::default()),
            Arc::new(Notify::new()),
        );

        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "tenantId": "t1",
            "name": "welcome",
            "trigger": { "kind": "OPTIN" },
            "status": "active",
            "steps": [
                { "id": "second", "kind": "END", "position": 2 },
                { "id": "first", "kind": "ADD_TAG", "tag": "new", "position": 1, "nextStepId": "second" }
            ]
        }))
        .unwrap();
        let definition = store.save_definition(definition).await.unwrap();

        let first = dispatcher.launch(&definition, "c1", JsonMap::new(), None).await.unwrap();
        let second = dispatcher.launch(&definition, "c1", JsonMap::new(), None).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let execution = store.get_execution(first.unwrap()).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.current_step_id.as_deref(), Some("first"));
        assert_eq!(execution.workflow_version, 1);
        assert_eq!(execution.depth, 0);
    }
}
