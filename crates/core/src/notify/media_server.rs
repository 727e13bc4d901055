//! Media server refresh pings.
//!
//! After an artifact lands next to a video, the media server is told to
//! rescan that item so the new subtitle shows up without a library refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::events::{EventEnvelope, EventHandler};

/// Outbound interface to a media server.
#[async_trait]
pub trait MediaServerNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ask the server to refresh whatever owns `file_path`.
    async fn notify_file(&self, file_path: &str) -> Result<(), String>;
}

/// Generic HTTP notifier: POSTs `{"path": ...}` to the configured endpoint.
pub struct HttpMediaServerNotifier {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpMediaServerNotifier {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl MediaServerNotifier for HttpMediaServerNotifier {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn notify_file(&self, file_path: &str) -> Result<(), String> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "path": file_path }));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", response.status()))
        }
    }
}

/// Bus subscriber that forwards new-artifact events to the notifier.
pub struct NotifyHandler {
    notifier: Arc<dyn MediaServerNotifier>,
}

impl NotifyHandler {
    pub fn new(notifier: Arc<dyn MediaServerNotifier>) -> Self {
        Self { notifier }
    }
}

impl EventHandler for NotifyHandler {
    fn event_types(&self) -> Option<Vec<&'static str>> {
        Some(vec!["subtitle.downloaded", "translation.completed"])
    }

    fn handle(&self, envelope: &EventEnvelope) -> Result<(), Box<dyn std::error::Error>> {
        let file_path = match &envelope.event {
            crate::events::Event::SubtitleDownloaded { file_path, .. } => file_path.clone(),
            crate::events::Event::TranslationCompleted { file_path, .. } => file_path.clone(),
            _ => return Ok(()),
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            match notifier.notify_file(&file_path).await {
                Ok(()) => debug!(path = %file_path, "media server notified"),
                Err(e) => warn!(path = %file_path, error = %e, "media server notify failed"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::events::Event;

    struct CountingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaServerNotifier for CountingNotifier {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn notify_file(&self, _file_path: &str) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forwards_artifact_events() {
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        let handler = NotifyHandler::new(notifier.clone());

        handler
            .handle(&EventEnvelope::new(Event::SubtitleDownloaded {
                file_path: "/m/a.mkv".into(),
                language: "de".into(),
                provider: "p".into(),
                score: 1,
            }))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_is_filtered() {
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        });
        let handler = NotifyHandler::new(notifier);
        let types = handler.event_types().unwrap();
        assert!(types.contains(&"subtitle.downloaded"));
        assert!(types.contains(&"translation.completed"));
        assert_eq!(types.len(), 2);
    }
}
