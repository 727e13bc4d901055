//! Outbound notifications: user webhooks and the media server refresh.

mod media_server;
mod webhooks;

pub use media_server::{HttpMediaServerNotifier, MediaServerNotifier, NotifyHandler};
pub use webhooks::{WebhookDispatcher, WebhookDispatcherConfig};
