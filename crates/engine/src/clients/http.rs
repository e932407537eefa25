use async_trait::async_trait;
use tracing::debug;

use crate::clients::{TransportError, WebhookClient, WebhookRequest, WebhookResponse};

/// Outbound webhook calls over reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| TransportError(format!("invalid method {}: {}", request.method, e)))?;

        debug!("Calling webhook {} {}", method, request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError(format!("request timed out after {:?}", request.timeout))
            } else {
                TransportError(format!("request failed: {}", e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;

        Ok(WebhookResponse { status, body })
    }
}
