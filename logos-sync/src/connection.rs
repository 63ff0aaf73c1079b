//! Live connection handle for one connected session.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::{ConnectAck, DocumentMessage, RoutedEvent, SUBMIT_OP_EVENT};
use crate::routing::ConnectionRegistry;
use crate::transport::Transport;

/// A session's view of the shared transport.
///
/// Inbound events are received by registering with the shared
/// [`ConnectionRegistry`] under this handle's session and subscriber ids.
pub struct DocumentConnection {
    session_id: String,
    subscriber_id: String,
    existing: bool,
    private_key: Option<String>,
    public_key: Option<String>,
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
    /// Events this handle registered, for `close`.
    events: Mutex<Vec<String>>,
}

impl DocumentConnection {
    pub(crate) fn new(
        session_id: String,
        ack: ConnectAck,
        transport: Arc<dyn Transport>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            session_id,
            subscriber_id: ack.subscriber_id,
            existing: ack.existing,
            private_key: ack.private_key,
            public_key: ack.public_key,
            transport,
            registry,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Whether the session already existed on the service.
    pub fn existing(&self) -> bool {
        self.existing
    }

    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// Receive `event` for this session.
    ///
    /// Calling again for the same event replaces the previous receiver.
    pub async fn on(&self, event: &str) -> mpsc::UnboundedReceiver<RoutedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .register(event, &self.session_id, &self.subscriber_id, tx)
            .await;

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if !events.iter().any(|e| e == event) {
            events.push(event.to_owned());
        }
        rx
    }

    /// Submit operations for sequencing.
    pub async fn submit(&self, messages: &[DocumentMessage]) -> Result<(), TransportError> {
        let payload =
            serde_json::to_value(messages).map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.transport
            .emit(SUBMIT_OP_EVENT, &self.session_id, payload)
            .await
    }

    /// Remove every route this handle registered.
    pub async fn close(&self) {
        let events = std::mem::take(
            &mut *self.events.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for event in events {
            self.registry
                .unregister(&event, &self.session_id, &self.subscriber_id)
                .await;
        }
        log::debug!("Closed connection {} on {}", self.subscriber_id, self.session_id);
    }
}

impl std::fmt::Debug for DocumentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentConnection")
            .field("session_id", &self.session_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("existing", &self.existing)
            .finish_non_exhaustive()
    }
}
