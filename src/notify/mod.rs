use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::shared::state::AppState;
use crate::tickets::TicketStatus;

/// Fire-and-forget event mirrored to connected listeners whenever a ticket
/// mutation succeeds through the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TicketEvent {
    #[serde(rename = "ticketAssigned")]
    Assigned {
        #[serde(rename = "ticketId")]
        ticket_id: Uuid,
        #[serde(rename = "assignedTo")]
        assigned_to: Uuid,
    },
    #[serde(rename = "ticketStatusUpdated")]
    StatusUpdated {
        #[serde(rename = "ticketId")]
        ticket_id: Uuid,
        status: TicketStatus,
    },
}

/// Single shared broadcast channel. Constructed once in `main` and injected
/// into `AppState`; publishing never blocks and never fails the caller.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<TicketEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Best effort: an event with no live subscribers is simply dropped.
    pub fn publish(&self, event: TicketEvent) {
        if self.tx.send(event).is_err() {
            debug!("ticket event dropped, no subscribers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| relay_events(socket, rx))
}

async fn relay_events(socket: WebSocket, mut rx: broadcast::Receiver<TicketEvent>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // A lagged listener skips missed events; the UI is
                    // expected to reconcile via its own re-fetch.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}
