//! In-process typed event bus.
//!
//! Components publish business events; subscribers (WebSocket forwarder,
//! webhook dispatcher, metrics, notifier) consume them either synchronously
//! through registered handlers or via the broadcast feed.

mod bus;
mod types;

pub use bus::{EventBus, EventHandler};
pub use types::*;
