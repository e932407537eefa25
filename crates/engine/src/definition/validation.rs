use std::collections::HashSet;

use crate::{
    definition::{workflow::MAX_DELAY_DAYS, StepKind, WorkflowDefinition},
    Error, Result,
};

/// Check a definition before it is saved.
///
/// All problems are collected into a single `Error::Validation` so the author
/// sees every broken step at once.
pub fn validate(definition: &WorkflowDefinition) -> Result<()> {
    let mut problems = Vec::new();

    if definition.tenant_id.trim().is_empty() {
        problems.push("tenantId must not be empty".to_string());
    }

    if let Some(predicate) = &definition.trigger.predicate {
        if predicate.equals.keys().any(|k| k.trim().is_empty()) {
            problems.push("trigger predicate has an empty field name".to_string());
        }
    }

    let mut ids = HashSet::new();
    for step in &definition.steps {
        if step.id.trim().is_empty() {
            problems.push("step id must not be empty".to_string());
        } else if !ids.insert(step.id.as_str()) {
            problems.push(format!("duplicate step id '{}'", step.id));
        }
    }

    let resolves = |target: &str| definition.steps.iter().any(|s| s.id == target);

    for step in &definition.steps {
        if let Some(next) = &step.next_step_id {
            if !resolves(next) {
                problems.push(format!("step '{}' points to unknown step '{}'", step.id, next));
            }
        }

        match &step.kind {
            StepKind::SendMessage(config) => {
                if config.template.trim().is_empty() {
                    problems.push(format!("step '{}' has no message template", step.id));
                }
            }
            StepKind::Delay(config) => {
                if config.value == 0 {
                    problems.push(format!("delay step '{}' must wait a positive amount", step.id));
                } else if config.duration() > chrono::Duration::days(MAX_DELAY_DAYS) {
                    problems.push(format!(
                        "delay step '{}' waits longer than {} days",
                        step.id, MAX_DELAY_DAYS
                    ));
                }
            }
            StepKind::Condition(config) => {
                if config.branches.is_empty() {
                    problems.push(format!("condition step '{}' has no branches", step.id));
                }
                for (idx, branch) in config.branches.iter().enumerate() {
                    if branch.when.conditions.is_empty() {
                        problems.push(format!(
                            "condition step '{}' branch {} has no conditions",
                            step.id, idx
                        ));
                    }
                    if branch.when.conditions.iter().any(|c| c.field.trim().is_empty()) {
                        problems.push(format!(
                            "condition step '{}' branch {} references an empty field",
                            step.id, idx
                        ));
                    }
                    if !resolves(&branch.next_step_id) {
                        problems.push(format!(
                            "condition step '{}' branch {} points to unknown step '{}'",
                            step.id, idx, branch.next_step_id
                        ));
                    }
                }
                if let Some(default) = &config.default_step_id {
                    if !resolves(default) {
                        problems.push(format!(
                            "condition step '{}' default points to unknown step '{}'",
                            step.id, default
                        ));
                    }
                }
            }
            StepKind::AddTag(config) | StepKind::RemoveTag(config) => {
                if config.tag.trim().is_empty() {
                    problems.push(format!("tag step '{}' has an empty tag", step.id));
                }
            }
            StepKind::UpdateContact(config) => {
                if config.fields.is_empty() {
                    problems.push(format!("update step '{}' has no fields", step.id));
                }
            }
            StepKind::Webhook(config) => {
                if reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes()).is_err() {
                    problems.push(format!(
                        "webhook step '{}' has invalid method '{}'",
                        step.id, config.method
                    ));
                }
                // Templated URLs are only checked once rendered
                if !crate::template::is_template(&config.url) {
                    if let Err(e) = url::Url::parse(&config.url) {
                        problems.push(format!(
                            "webhook step '{}' has invalid url '{}': {}",
                            step.id, config.url, e
                        ));
                    }
                }
                if config.timeout_secs == Some(0) {
                    problems.push(format!("webhook step '{}' timeout must be positive", step.id));
                }
            }
            StepKind::StartWorkflow(config) => {
                if config.workflow_id == definition.id {
                    problems.push(format!(
                        "start-workflow step '{}' cannot start its own workflow",
                        step.id
                    ));
                }
            }
            StepKind::End => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems.join("; ")))
    }
}
