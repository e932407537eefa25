use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::{append_activity, ActivityLog, Collaborators},
    clock::Clock,
    config::EngineConfig,
    metrics,
    store::{ActivityKind, ActivityRecord, Execution, Store},
    workflow::{Event, ExecutionScheduler, StepInterpreter, TriggerDispatcher},
    Result,
};

/// Entry point that wires the dispatcher, interpreter and scheduler
/// together over one store.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    dispatcher: Arc<TriggerDispatcher>,
    scheduler: Arc<ExecutionScheduler>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let activity = collaborators.activity.clone();

        let dispatcher = Arc::new(TriggerDispatcher::new(
            store.clone(),
            activity.clone(),
            clock.clone(),
            wake.clone(),
        ));

        let interpreter = StepInterpreter::new(
            store.clone(),
            collaborators,
            dispatcher.clone(),
            clock.clone(),
            config.max_chain_depth,
            config.webhook_timeout(),
        );

        let scheduler = Arc::new(ExecutionScheduler::new(
            store.clone(),
            interpreter,
            activity.clone(),
            clock.clone(),
            wake,
            config,
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Self {
            store,
            dispatcher,
            scheduler,
            activity,
            clock,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn dispatch(&self, event: &Event) -> Result<Vec<Uuid>> {
        self.dispatcher.dispatch(event).await
    }

    /// Cancel a RUNNING or WAITING execution. A step already in progress
    /// finishes first; the worker notices at its next write.
    pub async fn cancel(&self, id: Uuid) -> Result<Execution> {
        let now = self.clock.now();
        let execution = self.store.cancel_execution(id, now).await?;

        info!("Execution {} canceled", id);
        metrics::EXECUTIONS_CANCELED_TOTAL.inc();

        append_activity(
            self.activity.as_ref(),
            ActivityRecord::new(
                &execution.tenant_id,
                &execution.subject_id,
                ActivityKind::WorkflowCanceled,
                "Workflow canceled",
                json!({ "workflowId": execution.workflow_id, "executionId": execution.id }),
                now,
            ),
        )
        .await;

        Ok(execution)
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        self.store.get_execution(id).await
    }

    pub async fn list_executions(&self, workflow_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Execution>> {
        self.store.list_executions(workflow_id, limit, offset).await
    }

    /// Run a single scheduling pass in the caller's task. Returns how many
    /// executions were driven.
    pub async fn tick(&self) -> Result<usize> {
        self.scheduler.tick("tick").await
    }

    /// Start the background worker pool and resume poller
    pub async fn start(&self) -> Result<()> {
        info!("Starting workflow engine");

        self.scheduler.rebuild_timers().await?;

        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Ok(());
        }
        handles.extend(self.scheduler.spawn(self.shutdown_tx.subscribe()));

        Ok(())
    }

    /// Signal the background tasks to stop and wait for them
    pub async fn shutdown(&self) {
        info!("Stopping workflow engine");

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}
