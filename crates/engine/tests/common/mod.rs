#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use autoflow_engine::{
    clients::{
        Collaborators, MessageDisposition, Messenger, TransportError, WebhookClient, WebhookRequest,
        WebhookResponse,
    },
    clock::{Clock, MockClock},
    config::EngineConfig,
    definition::{DefinitionStatus, EventKind, WorkflowDefinition},
    store::{Execution, SqliteStore, Store},
    workflow::{Event, WorkflowEngine},
    Error, Result,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub subject_id: String,
    pub template: String,
    pub data: Value,
}

/// Accepts every message and remembers it.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        _tenant_id: &str,
        subject_id: &str,
        template: &str,
        data: &Value,
    ) -> Result<MessageDisposition> {
        self.sent.lock().unwrap().push(SentMessage {
            subject_id: subject_id.to_string(),
            template: template.to_string(),
            data: data.clone(),
        });
        Ok(MessageDisposition::Accepted)
    }
}

/// Answers every webhook call with the same response.
pub struct StaticWebhookClient {
    pub status: u16,
    pub body: String,
    pub calls: Mutex<Vec<WebhookRequest>>,
}

impl StaticWebhookClient {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WebhookClient for StaticWebhookClient {
    async fn call(&self, request: WebhookRequest) -> std::result::Result<WebhookResponse, TransportError> {
        self.calls.lock().unwrap().push(request);
        Ok(WebhookResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<SqliteStore>,
    pub clock: MockClock,
    pub messenger: Arc<RecordingMessenger>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(StaticWebhookClient::new(200, "{}")), EngineConfig::default()).await
}

pub async fn harness_with(webhooks: Arc<dyn WebhookClient>, config: EngineConfig) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.init().await.unwrap();
    assemble(store.clone(), store, webhooks, config)
}

/// Harness whose engine writes through a `HookedStore`
pub async fn hooked_harness() -> (Harness, Arc<HookedStore>) {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.init().await.unwrap();

    let clock = MockClock::new(start_time());
    let hooked = Arc::new(HookedStore::new(store.clone(), clock.clone()));
    let harness = assemble_with_clock(
        hooked.clone(),
        store,
        clock,
        Arc::new(StaticWebhookClient::new(200, "{}")),
        EngineConfig::default(),
    );
    (harness, hooked)
}

fn assemble(
    engine_store: Arc<dyn Store>,
    store: Arc<SqliteStore>,
    webhooks: Arc<dyn WebhookClient>,
    config: EngineConfig,
) -> Harness {
    assemble_with_clock(engine_store, store, MockClock::new(start_time()), webhooks, config)
}

fn assemble_with_clock(
    engine_store: Arc<dyn Store>,
    store: Arc<SqliteStore>,
    clock: MockClock,
    webhooks: Arc<dyn WebhookClient>,
    config: EngineConfig,
) -> Harness {
    let messenger = Arc::new(RecordingMessenger::default());

    let collaborators = Collaborators {
        messenger: messenger.clone(),
        subjects: store.clone(),
        activity: store.clone(),
        webhooks,
    };

    let engine = Arc::new(WorkflowEngine::new(
        engine_store,
        collaborators,
        Arc::new(clock.clone()),
        config,
    ));

    Harness {
        engine,
        store,
        clock,
        messenger,
    }
}

/// Delegates to a `SqliteStore` with two switches for interleavings that are
/// hard to hit with real workers: cancel right after a progress save, and
/// refuse to create executions of one workflow.
pub struct HookedStore {
    inner: Arc<SqliteStore>,
    clock: MockClock,
    pub cancel_after_save: Mutex<bool>,
    pub fail_create_for: Mutex<Option<Uuid>>,
}

impl HookedStore {
    pub fn new(inner: Arc<SqliteStore>, clock: MockClock) -> Self {
        Self {
            inner,
            clock,
            cancel_after_save: Mutex::new(false),
            fail_create_for: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Store for HookedStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn save_definition(&self, definition: WorkflowDefinition) -> Result<WorkflowDefinition> {
        self.inner.save_definition(definition).await
    }

    async fn get_definition(&self, id: Uuid) -> Result<Option<WorkflowDefinition>> {
        self.inner.get_definition(id).await
    }

    async fn list_active_definitions(&self, tenant_id: &str, kind: EventKind) -> Result<Vec<WorkflowDefinition>> {
        self.inner.list_active_definitions(tenant_id, kind).await
    }

    async fn update_definition_status(&self, id: Uuid, status: DefinitionStatus) -> Result<()> {
        self.inner.update_definition_status(id, status).await
    }

    async fn create_execution(&self, execution: &Execution) -> Result<()> {
        if *self.fail_create_for.lock().unwrap() == Some(execution.workflow_id) {
            return Err(Error::Internal("database is locked".to_string()));
        }
        self.inner.create_execution(execution).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        self.inner.get_execution(id).await
    }

    async fn get_active_execution(&self, workflow_id: Uuid, subject_id: &str) -> Result<Option<Execution>> {
        self.inner.get_active_execution(workflow_id, subject_id).await
    }

    async fn list_executions(&self, workflow_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Execution>> {
        self.inner.list_executions(workflow_id, limit, offset).await
    }

    async fn cancel_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<Execution> {
        self.inner.cancel_execution(id, now).await
    }

    async fn claim_runnable(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Execution>> {
        self.inner.claim_runnable(worker_id, now, lease_until, limit).await
    }

    async fn still_owned(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.inner.still_owned(id, worker_id, now).await
    }

    async fn save_progress(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.save_progress(execution, worker_id, now, lease_until).await?;
        if *self.cancel_after_save.lock().unwrap() {
            self.inner.cancel_execution(execution.id, self.clock.now()).await?;
        }
        Ok(())
    }

    async fn suspend_execution(
        &self,
        execution: &Execution,
        worker_id: &str,
        now: DateTime<Utc>,
        resume_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.suspend_execution(execution, worker_id, now, resume_at).await
    }

    async fn finish_execution(&self, execution: &Execution, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.inner.finish_execution(execution, worker_id, now).await
    }

    async fn release_claim(&self, id: Uuid, worker_id: &str) -> Result<()> {
        self.inner.release_claim(id, worker_id).await
    }

    async fn schedule_resume(&self, execution_id: Uuid, resume_at: DateTime<Utc>) -> Result<()> {
        self.inner.schedule_resume(execution_id, resume_at).await
    }

    async fn poll_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.inner.poll_due(now).await
    }

    async fn resume_execution(&self, execution_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.inner.resume_execution(execution_id, now).await
    }

    async fn pending_timers(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
        self.inner.pending_timers().await
    }
}

impl Harness {
    pub async fn save(&self, definition: WorkflowDefinition) -> WorkflowDefinition {
        self.store.save_definition(definition).await.unwrap()
    }
}

/// An active definition for tenant `t1`
pub fn definition(trigger: &str, steps: Value) -> WorkflowDefinition {
    serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "tenantId": "t1",
        "name": "test workflow",
        "trigger": { "kind": trigger },
        "status": "active",
        "steps": steps
    }))
    .unwrap()
}

pub fn event(kind: &str, subject_id: &str, data: Value) -> Event {
    serde_json::from_value(json!({
        "kind": kind,
        "tenantId": "t1",
        "subjectId": subject_id,
        "data": data
    }))
    .unwrap()
}
