use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::{
    clients::{MessageDisposition, Messenger},
    Error, Result,
};

/// Writes send requests to the log. Used when no relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send_message(
        &self,
        tenant_id: &str,
        subject_id: &str,
        template: &str,
        data: &JsonValue,
    ) -> Result<MessageDisposition> {
        info!(
            tenant_id,
            subject_id,
            template,
            data = %data,
            "Message send requested"
        );
        Ok(MessageDisposition::Accepted)
    }
}

/// Forwards send requests to an HTTP relay in front of the delivery service.
#[derive(Debug, Clone)]
pub struct RelayMessenger {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RelayMessenger {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Messenger for RelayMessenger {
    async fn send_message(
        &self,
        tenant_id: &str,
        subject_id: &str,
        template: &str,
        data: &JsonValue,
    ) -> Result<MessageDisposition> {
        let payload = json!({
            "tenantId": tenant_id,
            "subjectId": subject_id,
            "template": template,
            "data": data,
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Message relay unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(MessageDisposition::Accepted)
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(MessageDisposition::Rejected(format!("HTTP {}: {}", status.as_u16(), body)))
        }
    }
}
