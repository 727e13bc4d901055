//! WebSocket push channel.
//!
//! Forwards event-bus envelopes as JSON `{type, data, ts}` frames. The first
//! client message must be an auth payload carrying the same API key as the
//! REST surface; a periodic heartbeat keeps idle connections alive.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

use sublarr_core::{AuthRequest, EventEnvelope};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct AuthFrame {
    #[serde(default)]
    api_key: Option<String>,
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // Connection-time auth: the first frame must carry the API key unless
    // authentication is disabled.
    if state.authenticator().method() != "none" {
        let authed = match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Option<AuthFrame> = serde_json::from_str(&text).ok();
                let key = frame.and_then(|f| f.api_key).unwrap_or_default();
                let mut headers = HashMap::new();
                headers.insert("x-api-key".to_string(), key);
                state
                    .authenticator()
                    .authenticate(&AuthRequest {
                        headers,
                        source_ip: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                    })
                    .await
                    .is_ok()
            }
            _ => false,
        };
        if !authed {
            warn!("websocket auth failed, closing");
            let _ = socket
                .send(Message::Text(
                    json!({"type": "auth_failed"}).to_string().into(),
                ))
                .await;
            return;
        }
        let _ = socket
            .send(Message::Text(json!({"type": "auth_ok"}).to_string().into()))
            .await;
    }

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    debug!("websocket client connected");

    let mut events = state.events().subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        if sink.send(Message::Text(envelope_frame(&envelope).into())).await.is_err() {
                            break;
                        }
                        WS_MESSAGES_SENT
                            .with_label_values(&[envelope.event.event_type()])
                            .inc();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        WS_LAG_EVENTS.inc();
                        warn!(skipped, "websocket client lagged behind event feed");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                let frame = json!({
                    "type": "heartbeat",
                    "data": {},
                    "ts": chrono::Utc::now().to_rfc3339(),
                }).to_string();
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Client pings and stray frames are ignored.
                    _ => {}
                }
            }
        }
    }

    WS_CONNECTIONS_ACTIVE.dec();
    debug!("websocket client disconnected");
}

/// Serialize an envelope as the wire frame `{type, data, ts}`.
fn envelope_frame(envelope: &EventEnvelope) -> String {
    let mut data = serde_json::to_value(&envelope.event).unwrap_or_default();
    if let serde_json::Value::Object(map) = &mut data {
        map.remove("type");
    }
    json!({
        "type": envelope.event.event_type(),
        "data": data,
        "ts": envelope.ts.to_rfc3339(),
        "catalog_version": envelope.catalog_version,
    })
    .to_string()
}
