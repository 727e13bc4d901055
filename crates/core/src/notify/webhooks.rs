//! Outbound webhook dispatch.
//!
//! Subscribed to the event bus; every event is POSTed as JSON to each
//! configured URL. 5xx responses are retried with exponential backoff, three
//! attempts total. Delivery runs on its own task so the bus never blocks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::events::{EventEnvelope, EventHandler};

#[derive(Debug, Clone)]
pub struct WebhookDispatcherConfig {
    pub urls: Vec<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for WebhookDispatcherConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

pub struct WebhookDispatcher {
    config: WebhookDispatcherConfig,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatcherConfig) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Arc::new(Self { config, client })
    }

    async fn deliver(client: reqwest::Client, url: String, body: serde_json::Value, max_attempts: u32) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = client.post(&url).json(&body).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, "webhook delivered");
                    return;
                }
                Ok(response) if response.status().is_server_error() => {
                    if attempt >= max_attempts {
                        warn!(url = %url, status = %response.status(), "webhook gave up");
                        return;
                    }
                }
                Ok(response) => {
                    // 4xx: the receiver rejected it; retrying cannot help.
                    warn!(url = %url, status = %response.status(), "webhook rejected");
                    return;
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(url = %url, error = %e, "webhook gave up");
                        return;
                    }
                }
            }
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
            tokio::time::sleep(backoff).await;
        }
    }
}

impl EventHandler for Arc<WebhookDispatcher> {
    fn event_types(&self) -> Option<Vec<&'static str>> {
        None
    }

    fn handle(&self, envelope: &EventEnvelope) -> Result<(), Box<dyn std::error::Error>> {
        if self.config.urls.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(envelope)?;
        for url in &self.config.urls {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let max_attempts = self.config.max_attempts;
            tokio::spawn(WebhookDispatcher::deliver(client, url, body, max_attempts));
        }
        Ok(())
    }
}
