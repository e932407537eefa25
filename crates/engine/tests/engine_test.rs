mod common;

use chrono::Duration;
use futures::future::join_all;
use serde_json::json;

use autoflow_engine::{
    clock::Clock,
    config::EngineConfig,
    definition::DefinitionStatus,
    store::{ActivityKind, ExecutionStatus, Store},
    Error,
};

use common::{definition, event, harness, harness_with, hooked_harness, StaticWebhookClient};
use std::sync::Arc;

fn nurture_steps() -> serde_json::Value {
    json!([
        { "id": "send", "kind": "SEND_MESSAGE", "template": "welcome-email", "position": 0, "nextStepId": "wait" },
        { "id": "wait", "kind": "DELAY", "value": 1, "unit": "days", "position": 1, "nextStepId": "tag" },
        { "id": "tag", "kind": "ADD_TAG", "tag": "nurtured", "position": 2, "nextStepId": "done" },
        { "id": "done", "kind": "END", "position": 3 }
    ])
}

#[tokio::test]
async fn test_optin_nurture_sequence() {
    let h = harness().await;
    let workflow = h.save(definition("OPTIN", nurture_steps())).await;

    let ids = h
        .engine
        .dispatch(&event("OPTIN", "c1", json!({ "email": "c1@example.com" })))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.current_step_id.as_deref(), Some("send"));
    assert_eq!(execution.workflow_id, workflow.id);

    // First tick sends the message and parks at the delay
    assert_eq!(h.engine.tick().await.unwrap(), 1);
    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Waiting);
    assert_eq!(execution.current_step_id.as_deref(), Some("tag"));
    assert_eq!(execution.resume_at, Some(h.clock.now() + Duration::days(1)));
    assert_eq!(execution.updated_at, h.clock.now());

    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "welcome-email");
    assert_eq!(sent[0].data["email"], "c1@example.com");

    // Nothing is due yet
    h.clock.advance(Duration::hours(23));
    assert_eq!(h.engine.tick().await.unwrap(), 0);
    assert!(h.store.list_tags("t1", "c1").await.unwrap().is_empty());

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.engine.tick().await.unwrap(), 1);

    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
    assert!(execution.claimed_by.is_none());
    assert_eq!(h.store.list_tags("t1", "c1").await.unwrap(), vec!["nurtured".to_string()]);

    let kinds: Vec<ActivityKind> = h
        .store
        .list_activities("t1", "c1")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::WorkflowStarted,
            ActivityKind::MessageSent,
            ActivityKind::TagAdded,
            ActivityKind::WorkflowCompleted,
        ]
    );
}

#[tokio::test]
async fn test_condition_routes_each_subject() {
    let h = harness().await;
    h.save(definition(
        "FORM_SUBMIT",
        json!([
            { "id": "check", "kind": "CONDITION",
              "branches": [{
                  "when": { "conditions": [{ "field": "score", "operator": "greater_than", "value": 50 }] },
                  "nextStepId": "stepA"
              }],
              "defaultStepId": "stepB" },
            { "id": "stepA", "kind": "ADD_TAG", "tag": "hot", "position": 1 },
            { "id": "stepB", "kind": "ADD_TAG", "tag": "cold", "position": 2 }
        ]),
    ))
    .await;

    for (subject, data) in [("c1", json!({ "score": 80 })), ("c2", json!({ "score": 10 })), ("c3", json!({}))] {
        h.engine.dispatch(&event("FORM_SUBMIT", subject, data)).await.unwrap();
    }

    assert_eq!(h.engine.tick().await.unwrap(), 3);

    assert_eq!(h.store.list_tags("t1", "c1").await.unwrap(), vec!["hot".to_string()]);
    assert_eq!(h.store.list_tags("t1", "c2").await.unwrap(), vec!["cold".to_string()]);
    assert_eq!(h.store.list_tags("t1", "c3").await.unwrap(), vec!["cold".to_string()]);
}

#[tokio::test]
async fn test_webhook_failure_is_recorded_on_execution() {
    let webhooks = Arc::new(StaticWebhookClient::new(500, "database unavailable"));
    let h = harness_with(webhooks.clone(), EngineConfig::default()).await;
    h.save(definition(
        "PURCHASE",
        json!([
            { "id": "notify", "kind": "WEBHOOK", "url": "https://crm.example.com/orders",
              "body": { "subject": "{{ subjectId }}", "order": "{{ orderId }}" }, "nextStepId": "tag" },
            { "id": "tag", "kind": "ADD_TAG", "tag": "synced", "position": 1 }
        ]),
    ))
    .await;

    let ids = h
        .engine
        .dispatch(&event("PURCHASE", "c1", json!({ "orderId": "A-17" })))
        .await
        .unwrap();
    h.engine.tick().await.unwrap();

    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("webhook returned HTTP 500: database unavailable")
    );
    assert_eq!(execution.current_step_id.as_deref(), Some("notify"));
    assert!(h.store.list_tags("t1", "c1").await.unwrap().is_empty());

    let calls = webhooks.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, Some(json!({ "subject": "c1", "order": "A-17" })));

    // Failed executions are not retried
    h.clock.advance(Duration::hours(1));
    assert_eq!(h.engine.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_events_create_one_execution() {
    let h = harness().await;
    let workflow = h.save(definition("TAG_ADDED", nurture_steps())).await;

    let events: Vec<_> = (0..20)
        .map(|_| event("TAG_ADDED", "c1", json!({ "tag": "lead" })))
        .collect();
    let results = join_all(events.iter().map(|e| h.engine.dispatch(e))).await;

    let created: usize = results.into_iter().map(|r| r.unwrap().len()).sum();
    assert_eq!(created, 1);
    assert_eq!(h.engine.list_executions(workflow.id, 50, 0).await.unwrap().len(), 1);

    // Still live while waiting on the delay
    h.engine.tick().await.unwrap();
    assert!(h
        .engine
        .dispatch(&event("TAG_ADDED", "c1", json!({})))
        .await
        .unwrap()
        .is_empty());

    // Once terminal, a new event starts a fresh execution
    let active = h.store.get_active_execution(workflow.id, "c1").await.unwrap().unwrap();
    h.engine.cancel(active.id).await.unwrap();
    let ids = h.engine.dispatch(&event("TAG_ADDED", "c1", json!({}))).await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.engine.list_executions(workflow.id, 50, 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_trigger_predicate_and_status_gate_dispatch() {
    let h = harness().await;
    let mut newsletter = definition("FORM_SUBMIT", json!([{ "id": "done", "kind": "END" }]));
    newsletter.trigger.predicate = Some(serde_json::from_value(json!({ "equals": { "formId": "newsletter" } })).unwrap());
    let newsletter = h.save(newsletter).await;

    let mut paused = definition("FORM_SUBMIT", json!([{ "id": "done", "kind": "END" }]));
    paused.status = autoflow_engine::definition::DefinitionStatus::Paused;
    h.save(paused).await;

    let ids = h
        .engine
        .dispatch(&event("FORM_SUBMIT", "c1", json!({ "formId": "contact" })))
        .await
        .unwrap();
    assert!(ids.is_empty());

    let ids = h
        .engine
        .dispatch(&event("FORM_SUBMIT", "c1", json!({ "formId": "newsletter" })))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.workflow_id, newsletter.id);

    // Other tenants never see this workflow
    let mut foreign = event("FORM_SUBMIT", "c1", json!({ "formId": "newsletter" }));
    foreign.tenant_id = "t2".to_string();
    assert!(h.engine.dispatch(&foreign).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_canceled_waiting_execution_never_resumes() {
    let h = harness().await;
    h.save(definition("OPTIN", nurture_steps())).await;

    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();
    h.engine.tick().await.unwrap();
    assert_eq!(
        h.engine.get_execution(ids[0]).await.unwrap().unwrap().status,
        ExecutionStatus::Waiting
    );

    let canceled = h.engine.cancel(ids[0]).await.unwrap();
    assert_eq!(canceled.status, ExecutionStatus::Canceled);

    h.clock.advance(Duration::days(2));
    assert!(h.store.poll_due(h.clock.now()).await.unwrap().is_empty());
    assert_eq!(h.engine.tick().await.unwrap(), 0);
    assert!(h.store.list_tags("t1", "c1").await.unwrap().is_empty());

    assert!(matches!(h.engine.cancel(ids[0]).await, Err(Error::InvalidState(_))));
    assert!(matches!(h.engine.cancel(uuid::Uuid::new_v4()).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_cancel_while_claimed_stops_at_next_write() {
    let h = harness().await;
    h.save(definition("OPTIN", nurture_steps())).await;
    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();

    // A worker holds the lease when the cancel lands
    let now = h.clock.now();
    let claimed = h
        .store
        .claim_runnable("w1", now, now + Duration::minutes(5), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    h.engine.cancel(ids[0]).await.unwrap();

    let mut progressed = claimed[0].clone();
    progressed.current_step_id = Some("wait".to_string());
    let err = h
        .store
        .save_progress(&progressed, "w1", now, now + Duration::minutes(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LeaseLost(_)));
    assert_eq!(
        h.engine.get_execution(ids[0]).await.unwrap().unwrap().status,
        ExecutionStatus::Canceled
    );
}

#[tokio::test]
async fn test_start_workflow_launches_independent_child() {
    let h = harness().await;
    let child = h
        .save(definition("TAG_ADDED", json!([{ "id": "mark", "kind": "ADD_TAG", "tag": "child-ran" }])))
        .await;
    h.save(definition(
        "OPTIN",
        json!([
            { "id": "launch", "kind": "START_WORKFLOW", "workflowId": child.id, "nextStepId": "done" },
            { "id": "done", "kind": "END", "position": 1 }
        ]),
    ))
    .await;

    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();
    h.engine.tick().await.unwrap();

    let parent = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(parent.status, ExecutionStatus::Completed);

    let launched = h.store.get_active_execution(child.id, "c1").await.unwrap().unwrap();
    assert_eq!(launched.parent_execution_id, Some(parent.id));
    assert_eq!(launched.depth, 1);

    h.engine.tick().await.unwrap();
    let launched = h.engine.get_execution(launched.id).await.unwrap().unwrap();
    assert_eq!(launched.status, ExecutionStatus::Completed);
    assert_eq!(h.store.list_tags("t1", "c1").await.unwrap(), vec!["child-ran".to_string()]);
}

#[tokio::test]
async fn test_step_loop_yields_after_step_limit() {
    let config = EngineConfig {
        max_steps_per_tick: 5,
        ..EngineConfig::default()
    };
    let h = harness_with(Arc::new(StaticWebhookClient::new(200, "{}")), config).await;
    h.save(definition(
        "OPTIN",
        json!([
            { "id": "ping", "kind": "ADD_TAG", "tag": "ping", "nextStepId": "pong" },
            { "id": "pong", "kind": "REMOVE_TAG", "tag": "ping", "position": 1, "nextStepId": "ping" }
        ]),
    ))
    .await;

    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();
    assert_eq!(h.engine.tick().await.unwrap(), 1);

    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert!(execution.claimed_by.is_none());
    assert_eq!(execution.current_step_id.as_deref(), Some("pong"));
}

#[tokio::test]
async fn test_missing_definition_fails_execution() {
    let h = harness().await;
    let workflow = h.save(definition("OPTIN", json!([{ "id": "done", "kind": "END" }]))).await;
    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();

    // Point the execution at a step the definition no longer has
    let mut changed = workflow.clone();
    changed.steps = definition("OPTIN", json!([{ "id": "other", "kind": "END" }])).steps;
    let changed = h.save(changed).await;
    assert_eq!(changed.version, workflow.version + 1);

    h.engine.tick().await.unwrap();
    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.unwrap().contains("step 'done' does not exist"));
}

#[tokio::test]
async fn test_background_workers_drive_new_executions() {
    let config = EngineConfig {
        workers: 2,
        poll_interval_ms: 20,
        ..EngineConfig::default()
    };
    let h = harness_with(Arc::new(StaticWebhookClient::new(200, "{}")), config).await;
    h.save(definition(
        "OPTIN",
        json!([
            { "id": "tag", "kind": "ADD_TAG", "tag": "welcomed", "nextStepId": "done" },
            { "id": "done", "kind": "END", "position": 1 }
        ]),
    ))
    .await;

    h.engine.start().await.unwrap();
    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();

    let mut status = ExecutionStatus::Running;
    for _ in 0..100 {
        status = h.engine.get_execution(ids[0]).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    h.engine.shutdown().await;

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(h.store.list_tags("t1", "c1").await.unwrap(), vec!["welcomed".to_string()]);
}

#[tokio::test]
async fn test_cancel_between_steps_skips_the_next_step() {
    let (h, hooked) = hooked_harness().await;
    h.save(definition(
        "OPTIN",
        json!([
            { "id": "tag", "kind": "ADD_TAG", "tag": "lead", "nextStepId": "send" },
            { "id": "send", "kind": "SEND_MESSAGE", "template": "welcome-email", "position": 1 }
        ]),
    ))
    .await;

    let ids = h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap();
    *hooked.cancel_after_save.lock().unwrap() = true;
    h.engine.tick().await.unwrap();

    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(h.store.list_tags("t1", "c1").await.unwrap(), vec!["lead".to_string()]);
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn test_failed_launch_does_not_block_other_workflows() {
    let (h, hooked) = hooked_harness().await;
    let broken = h.save(definition("PURCHASE", json!([{ "id": "done", "kind": "END" }]))).await;
    let healthy = h.save(definition("PURCHASE", json!([{ "id": "done", "kind": "END" }]))).await;
    *hooked.fail_create_for.lock().unwrap() = Some(broken.id);

    let ids = h.engine.dispatch(&event("PURCHASE", "c1", json!({}))).await.unwrap();

    assert_eq!(ids.len(), 1);
    let execution = h.engine.get_execution(ids[0]).await.unwrap().unwrap();
    assert_eq!(execution.workflow_id, healthy.id);
    assert!(h.engine.list_executions(broken.id, 50, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pausing_a_definition_stops_new_executions() {
    let h = harness().await;
    let workflow = h.save(definition("OPTIN", json!([{ "id": "done", "kind": "END" }]))).await;

    h.store
        .update_definition_status(workflow.id, DefinitionStatus::Paused)
        .await
        .unwrap();
    assert!(h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap().is_empty());

    h.store
        .update_definition_status(workflow.id, DefinitionStatus::Active)
        .await
        .unwrap();
    assert_eq!(h.engine.dispatch(&event("OPTIN", "c1", json!({}))).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_oversized_delay_is_rejected_at_save() {
    let h = harness().await;
    let err = h
        .store
        .save_definition(definition(
            "OPTIN",
            json!([{ "id": "wait", "kind": "DELAY", "value": 100000000u32, "unit": "days" }]),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
