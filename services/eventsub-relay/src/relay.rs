//! Local WebSocket relay
//!
//! Exactly one downstream consumer is held at a time. A new connection takes
//! the slot and the previous one stops receiving notifications (its socket is
//! left open). Nothing is buffered while no consumer is attached.
//!
//! The relay has no authentication. It must only listen on loopback or an
//! otherwise trusted interface.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notice queued to every new consumer.
pub const CONNECTION_OPENED: &str = "Websocket connection opened.";
/// Plain-text reply to anything the consumer sends.
pub const ACK_REPLY: &str = "Greetings";

/// Frames a consumer may fall behind by before notifications are dropped.
const QUEUE_DEPTH: usize = 256;

/// JSON frame sent to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RelayMessage {
    /// `{"type":"default","data":"..."}`
    Default(String),
    /// `{"type":"twitchData","data":{...notification...}}`
    TwitchData(Value),
}

impl RelayMessage {
    fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "failed to serialize relay message");
                None
            }
        }
    }
}

struct Consumer {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// Receiving side of an attached consumer.
pub struct ConsumerHandle {
    pub id: Uuid,
    /// Outbound queue of this consumer, for direct replies
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

/// Single-slot holder of the current consumer.
#[derive(Default)]
pub struct RelayChannel {
    slot: Mutex<Option<Consumer>>,
}

impl RelayChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the consumer slot with a fresh queue, replacing any current
    /// consumer, and queue the connection-opened notice.
    pub async fn attach(&self) -> ConsumerHandle {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let id = Uuid::new_v4();

        if let Some(frame) = RelayMessage::Default(CONNECTION_OPENED.to_string()).to_frame() {
            // Fresh queue, cannot be full
            let _ = tx.try_send(frame);
        }

        let previous = self.slot.lock().await.replace(Consumer {
            id,
            tx: tx.clone(),
        });
        match previous {
            Some(old) => info!(consumer = %id, replaced = %old.id, "relay consumer replaced"),
            None => info!(consumer = %id, "relay consumer attached"),
        }

        ConsumerHandle { id, tx, rx }
    }

    /// Release the slot if `id` still holds it.
    pub async fn detach(&self, id: Uuid) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|c| c.id == id) {
            *slot = None;
            info!(consumer = %id, "relay consumer detached");
        } else {
            debug!(consumer = %id, "stale consumer closed, slot already taken");
        }
    }

    #[cfg(test)]
    pub async fn is_attached(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Queue a notification for the current consumer.
    ///
    /// Returns `false` when nobody is attached, the queue is closed or full.
    pub async fn forward(&self, notification: Value) -> bool {
        let Some(frame) = RelayMessage::TwitchData(notification).to_frame() else {
            crate::metrics::record_forward(false);
            return false;
        };

        let delivered = {
            let slot = self.slot.lock().await;
            match slot.as_ref() {
                None => {
                    debug!("no relay consumer attached, dropping notification");
                    false
                }
                Some(consumer) => match consumer.tx.try_send(frame) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(consumer = %consumer.id, "relay consumer queue full, dropping notification");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(consumer = %consumer.id, "relay consumer gone, dropping notification");
                        false
                    }
                },
            }
        };

        crate::metrics::record_forward(delivered);
        delivered
    }
}

/// WebSocket router for the relay listener. Any path upgrades.
pub fn build_relay_router(relay: Arc<RelayChannel>) -> Router {
    Router::new().fallback(ws_handler).with_state(relay)
}

async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<RelayChannel>>) -> Response {
    ws.on_upgrade(move |socket| serve_consumer(socket, relay))
}

/// Pump the consumer's queue to the socket and answer inbound frames until
/// the socket closes.
async fn serve_consumer(socket: WebSocket, relay: Arc<RelayChannel>) {
    let ConsumerHandle { id, tx, mut rx } = relay.attach().await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                debug!(consumer = %id, error = %e, "relay send failed");
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                info!(consumer = %id, message = %text.as_str(), "received from relay consumer");
                let _ = tx.try_send(ACK_REPLY.to_string());
            }
            Ok(Message::Binary(bytes)) => {
                info!(consumer = %id, len = bytes.len(), "received binary frame from relay consumer");
                let _ = tx.try_send(ACK_REPLY.to_string());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(consumer = %id, error = %e, "relay socket error");
                break;
            }
        }
    }

    relay.detach(id).await;
    writer.abort();
    info!(consumer = %id, "relay connection closed");
}
