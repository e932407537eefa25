use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{append_activity, ActivityLog},
    clock::Clock,
    config::EngineConfig,
    metrics,
    store::{ActivityKind, ActivityRecord, Execution, ExecutionStatus, Store},
    workflow::{ExecutionContext, StepError, StepInterpreter, TimerIndex, Transition},
    Error, Result,
};

/// Claims runnable executions and drives them step by step.
///
/// Every write goes through the lease taken in `claim_runnable`. Ownership is
/// checked again before each step after the first, so a cancel or an expired
/// lease stops the worker between steps.
pub struct ExecutionScheduler {
    store: Arc<dyn Store>,
    interpreter: StepInterpreter,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    timers: TimerIndex,
    wake: Arc<Notify>,
    config: EngineConfig,
}

impl ExecutionScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        interpreter: StepInterpreter,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            interpreter,
            activity,
            clock,
            timers: TimerIndex::new(),
            wake,
            config,
        }
    }

    fn lease_until(&self) -> DateTime<Utc> {
        self.clock.now() + self.config.lease()
    }

    /// Reload the in-memory timer index from the durable timer table
    pub async fn rebuild_timers(&self) -> Result<()> {
        let pending = self.store.pending_timers().await?;
        info!("Loaded {} pending resume timers", pending.len());
        self.timers.rebuild(pending);
        Ok(())
    }

    /// Move every due WAITING execution back to RUNNING
    pub async fn resume_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let due = self.store.poll_due(now).await?;
        self.timers.pop_due(now);

        let mut resumed = 0;
        for id in due {
            if self.store.resume_execution(id, now).await? {
                debug!("Resumed execution {}", id);
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!("Resumed {} waiting executions", resumed);
            self.wake.notify_waiters();
        }
        Ok(resumed)
    }

    /// Claim one batch and drive each claimed execution until it suspends,
    /// terminates, or hits the per-tick step limit.
    pub async fn run_once(&self, worker_id: &str) -> Result<usize> {
        let claimed = self
            .store
            .claim_runnable(worker_id, self.clock.now(), self.lease_until(), self.config.batch_size)
            .await?;

        let count = claimed.len();
        for execution in claimed {
            let id = execution.id;
            match self.drive(execution, worker_id).await {
                Ok(()) => {}
                Err(Error::LeaseLost(_)) => self.lease_lost(id).await,
                Err(e) => {
                    // The lease stays in place and expires, then the step is retried
                    error!("Worker {} failed driving execution {}: {}", worker_id, id, e);
                }
            }
        }

        Ok(count)
    }

    /// One pass: resume whatever is due, then drive one batch.
    pub async fn tick(&self, worker_id: &str) -> Result<usize> {
        self.resume_due().await?;
        self.run_once(worker_id).await
    }

    async fn lease_lost(&self, id: Uuid) {
        match self.store.get_execution(id).await {
            Ok(Some(execution)) if execution.status == ExecutionStatus::Canceled => {
                info!("Execution {} was canceled, stopping", id);
            }
            Ok(_) => warn!("Lost lease on execution {}, another worker owns it now", id),
            Err(e) => error!("Lost lease on execution {} and could not reload it: {}", id, e),
        }
    }

    async fn drive(&self, mut execution: Execution, worker_id: &str) -> Result<()> {
        let definition = match self.store.get_definition(execution.workflow_id).await? {
            Some(definition) => definition,
            None => {
                let err = StepError::DefinitionNotFound(execution.workflow_id);
                return self.finish(execution, worker_id, Some(err)).await;
            }
        };

        if definition.version != execution.workflow_version {
            debug!(
                "Execution {} was started on version {} of workflow {}, now at {}",
                execution.id, execution.workflow_version, definition.id, definition.version
            );
        }

        let mut ctx = ExecutionContext::from_execution(&execution);

        for n in 0..self.config.max_steps_per_tick {
            if n > 0 && !self.store.still_owned(execution.id, worker_id, self.clock.now()).await? {
                return Err(Error::LeaseLost(execution.id));
            }

            let Some(step_id) = execution.current_step_id.clone() else {
                return self.finish(execution, worker_id, None).await;
            };

            let Some(step) = definition.step(&step_id) else {
                let err = StepError::MissingStep {
                    workflow_id: definition.id,
                    step_id,
                };
                return self.finish(execution, worker_id, Some(err)).await;
            };

            let transition = self.interpreter.execute(step, &mut ctx).await?;
            execution.data = ctx.data.clone();

            match transition {
                Transition::Advance(None) => return self.finish(execution, worker_id, None).await,
                Transition::Advance(Some(next)) | Transition::Branch(next) => {
                    execution.current_step_id = Some(next);
                    self.store
                        .save_progress(&execution, worker_id, self.clock.now(), self.lease_until())
                        .await?;
                }
                Transition::Suspend {
                    resume_at,
                    next_step_id,
                } => {
                    execution.current_step_id = next_step_id;
                    execution.resume_at = Some(resume_at);
                    self.store
                        .suspend_execution(&execution, worker_id, self.clock.now(), resume_at)
                        .await?;
                    self.timers.push(execution.id, resume_at);
                    info!("Execution {} waiting until {}", execution.id, resume_at);
                    return Ok(());
                }
                Transition::Fail(err) => return self.finish(execution, worker_id, Some(err)).await,
                Transition::Complete => return self.finish(execution, worker_id, None).await,
            }
        }

        warn!(
            "Execution {} ran {} steps without suspending, yielding",
            execution.id, self.config.max_steps_per_tick
        );
        self.store.release_claim(execution.id, worker_id).await
    }

    async fn finish(&self, mut execution: Execution, worker_id: &str, failure: Option<StepError>) -> Result<()> {
        let now = self.clock.now();
        execution.completed_at = Some(now);

        let (kind, description) = match &failure {
            Some(err) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(err.to_string());
                (ActivityKind::WorkflowFailed, format!("Workflow failed: {}", err))
            }
            None => {
                execution.status = ExecutionStatus::Completed;
                (ActivityKind::WorkflowCompleted, "Workflow completed".to_string())
            }
        };

        self.store.finish_execution(&execution, worker_id, now).await?;

        match &failure {
            Some(err) => {
                error!("Execution {} failed: {}", execution.id, err);
                metrics::EXECUTIONS_FAILED_TOTAL.inc();
            }
            None => {
                info!("Execution {} completed", execution.id);
                metrics::EXECUTIONS_COMPLETED_TOTAL.inc();
            }
        }

        append_activity(
            self.activity.as_ref(),
            ActivityRecord::new(
                &execution.tenant_id,
                &execution.subject_id,
                kind,
                description,
                json!({ "workflowId": execution.workflow_id, "executionId": execution.id }),
                now,
            ),
        )
        .await;

        Ok(())
    }

    /// Spawn the worker pool and the resume poller. All tasks exit once
    /// `shutdown` flips to true.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);

        for n in 0..self.config.workers {
            let scheduler = Arc::clone(self);
            let shutdown = shutdown.clone();
            let worker_id = format!("worker-{}-{}", n, Uuid::new_v4());
            handles.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id, shutdown).await;
            }));
        }

        let scheduler = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            scheduler.poller_loop(shutdown).await;
        }));

        handles
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        info!("Starting scheduler worker {}", worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&worker_id).await {
                // A full batch may mean more work is waiting
                Ok(n) if n > 0 => continue,
                Ok(_) => {}
                Err(e) => error!("Worker {} failed to claim executions: {}", worker_id, e),
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler worker {} stopped", worker_id);
    }

    async fn poller_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.poll_interval();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.resume_due().await {
                error!("Failed to resume due executions: {}", e);
            }

            // Wake early when the next known timer falls inside the interval
            let wait = self
                .timers
                .next_due()
                .and_then(|at| (at - self.clock.now()).to_std().ok())
                .map_or(interval, |until| until.min(interval));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Resume poller stopped");
    }
}
