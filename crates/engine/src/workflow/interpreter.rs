use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    clients::{append_activity, Collaborators, MessageDisposition, WebhookRequest},
    clock::Clock,
    definition::{
        ConditionConfig, JsonMap, SendMessageConfig, StartWorkflowConfig, StepKind, UpdateContactConfig,
        WebhookConfig, WorkflowStep,
    },
    metrics,
    store::{ActivityKind, ActivityRecord, Store},
    template::{render_template, render_value},
    workflow::{ExecutionContext, StepError, Transition, TriggerDispatcher},
    Result,
};

/// Performs one step's side effects and reports the resulting transition.
///
/// Step-level failures come back as `Transition::Fail`. An `Err` means the
/// engine's own storage failed and the step should be retried by whoever
/// next holds the lease.
pub struct StepInterpreter {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    dispatcher: Arc<TriggerDispatcher>,
    clock: Arc<dyn Clock>,
    max_chain_depth: u32,
    webhook_timeout: Duration,
}

impl StepInterpreter {
    pub fn new(
        store: Arc<dyn Store>,
        collaborators: Collaborators,
        dispatcher: Arc<TriggerDispatcher>,
        clock: Arc<dyn Clock>,
        max_chain_depth: u32,
        webhook_timeout: Duration,
    ) -> Self {
        Self {
            store,
            collaborators,
            dispatcher,
            clock,
            max_chain_depth,
            webhook_timeout,
        }
    }

    pub async fn execute(&self, step: &WorkflowStep, ctx: &mut ExecutionContext) -> Result<Transition> {
        debug!(
            "Executing step '{}' ({}) of execution {}",
            step.id,
            step.kind.name(),
            ctx.execution_id
        );
        metrics::STEPS_EXECUTED_TOTAL.inc();

        let next = step.next_step_id.clone();

        let transition = match &step.kind {
            StepKind::SendMessage(config) => self.send_message(config, ctx, next).await,
            StepKind::Delay(config) => match self.clock.now().checked_add_signed(config.duration()) {
                Some(resume_at) => Transition::Suspend {
                    resume_at,
                    next_step_id: next,
                },
                None => Transition::Fail(StepError::DelayOutOfRange {
                    step_id: step.id.clone(),
                }),
            },
            StepKind::Condition(config) => branch(step, config, ctx),
            StepKind::AddTag(config) => self.mutate_tag(&config.tag, true, ctx, next).await,
            StepKind::RemoveTag(config) => self.mutate_tag(&config.tag, false, ctx, next).await,
            StepKind::UpdateContact(config) => self.update_contact(config, ctx, next).await,
            StepKind::Webhook(config) => self.call_webhook(config, ctx, next).await,
            StepKind::StartWorkflow(config) => self.start_workflow(config, ctx, next).await?,
            StepKind::End => Transition::Complete,
        };

        Ok(transition)
    }

    async fn send_message(
        &self,
        config: &SendMessageConfig,
        ctx: &ExecutionContext,
        next: Option<String>,
    ) -> Transition {
        // Message requests never stop the execution
        let extra = match render_value(&Value::Object(config.data.clone()), &ctx.template_context()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => JsonMap::new(),
            Err(e) => {
                warn!(
                    "Not sending '{}' to subject {}: {}",
                    config.template, ctx.subject_id, e
                );
                return Transition::Advance(next);
            }
        };

        let mut data = ctx.data.clone();
        data.extend(extra);

        match self
            .collaborators
            .messenger
            .send_message(&ctx.tenant_id, &ctx.subject_id, &config.template, &Value::Object(data))
            .await
        {
            Ok(MessageDisposition::Accepted) => {
                append_activity(
                    self.collaborators.activity.as_ref(),
                    ActivityRecord::new(
                        &ctx.tenant_id,
                        &ctx.subject_id,
                        ActivityKind::MessageSent,
                        format!("Message '{}' requested", config.template),
                        json!({ "template": config.template, "executionId": ctx.execution_id }),
                        self.clock.now(),
                    ),
                )
                .await;
            }
            Ok(MessageDisposition::Rejected(reason)) => {
                warn!(
                    "Messaging rejected '{}' for subject {}: {}",
                    config.template, ctx.subject_id, reason
                );
            }
            Err(e) => {
                warn!(
                    "Messaging failed for '{}' to subject {}: {}",
                    config.template, ctx.subject_id, e
                );
            }
        }

        Transition::Advance(next)
    }

    async fn mutate_tag(&self, tag: &str, add: bool, ctx: &ExecutionContext, next: Option<String>) -> Transition {
        let subjects = &self.collaborators.subjects;
        let result = if add {
            subjects.add_tag(&ctx.tenant_id, &ctx.subject_id, tag).await
        } else {
            subjects.remove_tag(&ctx.tenant_id, &ctx.subject_id, tag).await
        };

        let changed = match result {
            Ok(changed) => changed,
            Err(e) => return Transition::Fail(StepError::Collaborator(e.to_string())),
        };

        if changed {
            let (kind, verb) = if add {
                (ActivityKind::TagAdded, "added")
            } else {
                (ActivityKind::TagRemoved, "removed")
            };
            append_activity(
                self.collaborators.activity.as_ref(),
                ActivityRecord::new(
                    &ctx.tenant_id,
                    &ctx.subject_id,
                    kind,
                    format!("Tag '{}' {}", tag, verb),
                    json!({ "tag": tag, "executionId": ctx.execution_id }),
                    self.clock.now(),
                ),
            )
            .await;
        } else {
            debug!("Tag '{}' already in place for subject {}", tag, ctx.subject_id);
        }

        Transition::Advance(next)
    }

    async fn update_contact(
        &self,
        config: &UpdateContactConfig,
        ctx: &mut ExecutionContext,
        next: Option<String>,
    ) -> Transition {
        let fields = match render_value(&Value::Object(config.fields.clone()), &ctx.template_context()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => JsonMap::new(),
            Err(e) => return Transition::Fail(StepError::Template(e.to_string())),
        };

        if let Err(e) = self
            .collaborators
            .subjects
            .update_fields(&ctx.tenant_id, &ctx.subject_id, &fields)
            .await
        {
            return Transition::Fail(StepError::Collaborator(e.to_string()));
        }

        let names: Vec<&String> = fields.keys().collect();
        append_activity(
            self.collaborators.activity.as_ref(),
            ActivityRecord::new(
                &ctx.tenant_id,
                &ctx.subject_id,
                ActivityKind::ContactUpdated,
                "Contact fields updated",
                json!({ "fields": names, "executionId": ctx.execution_id }),
                self.clock.now(),
            ),
        )
        .await;

        ctx.merge(fields);
        Transition::Advance(next)
    }

    async fn call_webhook(&self, config: &WebhookConfig, ctx: &mut ExecutionContext, next: Option<String>) -> Transition {
        let template_ctx = ctx.template_context();

        let request = match build_request(config, &template_ctx, self.webhook_timeout) {
            Ok(request) => request,
            Err(e) => return Transition::Fail(StepError::Template(e.to_string())),
        };

        info!("Calling webhook {} {} for execution {}", request.method, request.url, ctx.execution_id);
        metrics::WEBHOOK_CALLS_TOTAL.inc();

        let response = match self.collaborators.webhooks.call(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Webhook for execution {} failed: {}", ctx.execution_id, e);
                return Transition::Fail(StepError::Webhook {
                    status: None,
                    detail: e.to_string(),
                });
            }
        };

        if !response.is_success() {
            warn!(
                "Webhook for execution {} returned HTTP {}",
                ctx.execution_id, response.status
            );
            return Transition::Fail(StepError::Webhook {
                status: Some(response.status),
                detail: response.body,
            });
        }

        if let Some(key) = &config.save_response_as {
            let body = serde_json::from_str(&response.body).unwrap_or(Value::String(response.body));
            ctx.data.insert(key.clone(), body);
        }

        Transition::Advance(next)
    }

    async fn start_workflow(
        &self,
        config: &StartWorkflowConfig,
        ctx: &ExecutionContext,
        next: Option<String>,
    ) -> Result<Transition> {
        let depth = ctx.depth + 1;
        if depth > self.max_chain_depth {
            return Ok(Transition::Fail(StepError::ChainDepthExceeded {
                depth,
                max: self.max_chain_depth,
            }));
        }

        let target = match self.store.get_definition(config.workflow_id).await? {
            Some(target) if target.tenant_id == ctx.tenant_id => target,
            _ => return Ok(Transition::Fail(StepError::DefinitionNotFound(config.workflow_id))),
        };

        if !target.is_active() {
            info!(
                "Not starting workflow {} for subject {}: status is {}",
                target.id, ctx.subject_id, target.status
            );
            return Ok(Transition::Advance(next));
        }

        self.dispatcher
            .launch(&target, &ctx.subject_id, ctx.data.clone(), Some(ctx))
            .await?;

        Ok(Transition::Advance(next))
    }
}

fn branch(step: &WorkflowStep, config: &ConditionConfig, ctx: &ExecutionContext) -> Transition {
    let data = ctx.data_value();

    if let Some(matched) = config.branches.iter().find(|b| b.when.evaluate(&data)) {
        return Transition::Branch(matched.next_step_id.clone());
    }

    match &config.default_step_id {
        Some(default) => Transition::Branch(default.clone()),
        None => Transition::Fail(StepError::NoMatchingBranch {
            step_id: step.id.clone(),
        }),
    }
}

fn build_request(config: &WebhookConfig, template_ctx: &Value, default_timeout: Duration) -> Result<WebhookRequest> {
    let url = render_template(&config.url, template_ctx)?;

    let mut headers = std::collections::BTreeMap::new();
    for (name, value) in &config.headers {
        headers.insert(name.clone(), render_template(value, template_ctx)?);
    }

    let body = config
        .body
        .as_ref()
        .map(|body| render_value(body, template_ctx))
        .transpose()?;

    Ok(WebhookRequest {
        method: config.method.to_uppercase(),
        url,
        headers,
        body,
        timeout: config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout),
    })
}
