//! Services the engine talks to but does not own.
//!
//! Each collaborator sits behind a trait so the step interpreter can be
//! driven in tests without a network or a contact database.

mod http;
mod messaging;

pub use http::HttpWebhookClient;
pub use messaging::{LogMessenger, RelayMessenger};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use crate::{definition::JsonMap, store::ActivityRecord, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDisposition {
    Accepted,
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Hand a templated message to the delivery service. Delivery itself is
    /// not awaited.
    async fn send_message(
        &self,
        tenant_id: &str,
        subject_id: &str,
        template: &str,
        data: &JsonValue,
    ) -> Result<MessageDisposition>;
}

/// Contact tag and field mutations. Repeating a call is a no-op.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Returns whether the tag set changed
    async fn add_tag(&self, tenant_id: &str, subject_id: &str, tag: &str) -> Result<bool>;

    /// Returns whether the tag set changed
    async fn remove_tag(&self, tenant_id: &str, subject_id: &str, tag: &str) -> Result<bool>;

    async fn update_fields(&self, tenant_id: &str, subject_id: &str, fields: &JsonMap) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, record: ActivityRecord) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<JsonValue>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Connection failures, timeouts and malformed requests
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn call(&self, request: WebhookRequest) -> std::result::Result<WebhookResponse, TransportError>;
}

/// The full set of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub messenger: Arc<dyn Messenger>,
    pub subjects: Arc<dyn SubjectDirectory>,
    pub activity: Arc<dyn ActivityLog>,
    pub webhooks: Arc<dyn WebhookClient>,
}

/// Append without letting a logging failure affect the caller.
pub async fn append_activity(log: &dyn ActivityLog, record: ActivityRecord) {
    let kind = record.kind;
    let subject_id = record.subject_id.clone();
    if let Err(e) = log.append(record).await {
        warn!("Failed to append {} activity for subject {}: {}", kind, subject_id, e);
    }
}
