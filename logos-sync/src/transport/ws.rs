//! WebSocket transport over tokio-tungstenite.
//!
//! Frames are JSON text messages tagged by `type`:
//! ```text
//! {"type":"connectDocument",    "requestId":..., "request":{...}}
//! {"type":"connectDocumentAck", "requestId":..., "ack":{...} | "error":"..."}
//! {"type":"event",              "event":"op", "sessionId":"...", "payload":...}
//! ```
//!
//! A writer task drains an outgoing channel into the socket; a reader task
//! resolves pending handshakes by request id and forwards events to every
//! listener installed for the event name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::Transport;
use crate::error::TransportError;
use crate::protocol::{ConnectAck, ConnectRequest, InboundEvent};

/// One text frame on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    #[serde(rename_all = "camelCase")]
    ConnectDocument {
        request_id: Uuid,
        request: ConnectRequest,
    },
    #[serde(rename_all = "camelCase")]
    ConnectDocumentAck {
        request_id: Uuid,
        #[serde(default)]
        ack: Option<ConnectAck>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        event: String,
        session_id: String,
        payload: Value,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}

type AckSender = oneshot::Sender<Result<ConnectAck, TransportError>>;

#[derive(Default)]
struct WsShared {
    closed: bool,
    /// request id → waiting handshake
    pending: HashMap<Uuid, AckSender>,
    /// event name → physical listeners
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<InboundEvent>>>,
}

fn lock(shared: &Mutex<WsShared>) -> MutexGuard<'_, WsShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Transport`] backed by one WebSocket connection.
pub struct WsTransport {
    url: String,
    outgoing_tx: mpsc::Sender<String>,
    shared: Arc<Mutex<WsShared>>,
}

impl WsTransport {
    /// Connect to `url` and spawn the reader and writer tasks.
    pub async fn connect(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: route acks and events
        let shared = Arc::new(Mutex::new(WsShared::default()));
        let reader_shared = shared.clone();
        let reader_url = url.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => dispatch(text.as_str(), &reader_shared),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost: fail waiting handshakes, close listener channels
            let mut state = lock(&reader_shared);
            state.closed = true;
            state.pending.clear();
            state.listeners.clear();
            log::info!("Transport connection to {reader_url} closed");
        });

        log::info!("Transport connected to {url}");
        Ok(Self {
            url,
            outgoing_tx,
            shared,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the reader has observed the socket closing.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame.encode()?;
        self.outgoing_tx
            .send(text)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

fn dispatch(text: &str, shared: &Mutex<WsShared>) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dropping undecodable frame: {e}");
            return;
        }
    };

    match frame {
        Frame::ConnectDocumentAck {
            request_id,
            ack,
            error,
        } => {
            let waiter = lock(shared).pending.remove(&request_id);
            let Some(waiter) = waiter else {
                log::debug!("Acknowledgement for unknown request {request_id}");
                return;
            };
            let result = match (ack, error) {
                (_, Some(error)) => Err(TransportError::Rejected(error)),
                (Some(ack), None) => Ok(ack),
                (None, None) => Err(TransportError::Rejected("empty acknowledgement".into())),
            };
            let _ = waiter.send(result);
        }
        Frame::Event {
            event,
            session_id,
            payload,
        } => {
            let mut state = lock(shared);
            if let Some(listeners) = state.listeners.get_mut(&event) {
                listeners.retain(|tx| {
                    tx.send(InboundEvent {
                        session_id: session_id.clone(),
                        payload: payload.clone(),
                    })
                    .is_ok()
                });
            }
        }
        Frame::ConnectDocument { request_id, .. } => {
            log::debug!("Ignoring connect request {request_id} sent to a client");
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect_document(&self, request: ConnectRequest) -> Result<ConnectAck, TransportError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.shared);
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            state.pending.insert(request_id, tx);
        }

        let frame = Frame::ConnectDocument {
            request_id,
            request,
        };
        if let Err(e) = self.send_frame(&frame).await {
            lock(&self.shared).pending.remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    fn listen(&self, event: &str) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.shared);
        if !state.closed {
            state.listeners.entry(event.to_owned()).or_default().push(tx);
        }
        rx
    }

    async fn emit(&self, event: &str, session_id: &str, payload: Value) -> Result<(), TransportError> {
        self.send_frame(&Frame::Event {
            event: event.to_owned(),
            session_id: session_id.to_owned(),
            payload,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::Event {
            event: "op".into(),
            session_id: "doc".into(),
            payload: json!([1, 2]),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["sessionId"], "doc");
        assert_eq!(Frame::decode(&frame.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_decode_ack_without_error_field() {
        let id = Uuid::new_v4();
        let text = json!({
            "type": "connectDocumentAck",
            "requestId": id,
            "ack": {"subscriberId": "c1", "existing": false, "privateKey": null, "publicKey": null},
        })
        .to_string();
        match Frame::decode(&text).unwrap() {
            Frame::ConnectDocumentAck { request_id, ack, error } => {
                assert_eq!(request_id, id);
                assert_eq!(ack.unwrap().subscriber_id, "c1");
                assert!(error.is_none());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Frame::decode("{not json").is_err());
        assert!(Frame::decode(r#"{"type":"unknown"}"#).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_resolves_pending_ack() {
        let shared = Mutex::new(WsShared::default());
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock(&shared).pending.insert(id, tx);

        let frame = Frame::ConnectDocumentAck {
            request_id: id,
            ack: None,
            error: Some("denied".into()),
        };
        dispatch(&frame.encode().unwrap(), &shared);

        assert_eq!(rx.await.unwrap(), Err(TransportError::Rejected("denied".into())));
        assert!(lock(&shared).pending.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_and_prunes_closed_listeners() {
        let shared = Mutex::new(WsShared::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        lock(&shared)
            .listeners
            .insert("op".into(), vec![tx1, tx2]);
        drop(rx2);

        let frame = Frame::Event {
            event: "op".into(),
            session_id: "doc".into(),
            payload: json!({"n": 1}),
        };
        dispatch(&frame.encode().unwrap(), &shared);

        let received = rx1.recv().await.unwrap();
        assert_eq!(received.session_id, "doc");
        assert_eq!(received.payload, json!({"n": 1}));
        assert_eq!(lock(&shared).listeners["op"].len(), 1);
    }
}
