//! Live transport contract.
//!
//! One physical connection carries the handshake for every session plus a
//! stream of named events. [`crate::routing::ConnectionRegistry`] sits on top
//! and fans those events out to per-session subscribers.

pub mod ws;

pub use ws::WsTransport;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::{ConnectAck, ConnectRequest, InboundEvent};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a connect request and wait for its acknowledgement.
    async fn connect_document(&self, request: ConnectRequest) -> Result<ConnectAck, TransportError>;

    /// Install a physical listener for `event`.
    ///
    /// Every inbound event with that name is forwarded to the returned
    /// receiver until the connection closes.
    fn listen(&self, event: &str) -> mpsc::UnboundedReceiver<InboundEvent>;

    /// Send a named event for `session_id`.
    async fn emit(&self, event: &str, session_id: &str, payload: Value) -> Result<(), TransportError>;
}
