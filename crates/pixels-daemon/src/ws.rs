//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use pixels_connect::{SchedulerEvent, SchedulerSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    /// Full scheduler state, sent on connect
    #[serde(rename = "snapshot")]
    Snapshot(SchedulerSnapshot),
    #[serde(rename = "scheduler_event")]
    Event(SchedulerEvent),
    /// Events dropped because the client fell behind
    #[serde(rename = "lagged")]
    Lagged { skipped: u64 },
    #[serde(rename = "pong")]
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.scheduler.subscribe();

    info!("WebSocket client connected");

    let snapshot = WsMessage::Snapshot(state.scheduler.snapshot().await);
    if !send(&mut sender, &snapshot).await {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let msg = match event {
                    Ok(event) => WsMessage::Event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Scheduler event channel lagged");
                        WsMessage::Lagged { skipped }
                    }
                    Err(RecvError::Closed) => break,
                };
                if !send(&mut sender, &msg).await {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixels_core::PixelId;

    #[test]
    fn test_event_envelope() {
        let msg = WsMessage::Event(SchedulerEvent::Connected {
            pixel: PixelId(0xab),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "scheduler_event");
        assert_eq!(json["data"]["event"], "connected");
        assert_eq!(json["data"]["pixel"], 0xab);

        let json = serde_json::to_value(WsMessage::Lagged { skipped: 3 }).unwrap();
        assert_eq!(json["data"]["skipped"], 3);
    }
}
