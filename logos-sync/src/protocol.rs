//! Messages exchanged with the collaboration service.
//!
//! Handshake:
//! ```text
//! client ── ConnectRequest { sessionId, privateKey, publicKey, encrypted } ──► service
//! client ◄── ConnectAck { subscriberId, existing, privateKey, publicKey } ─── service
//! ```
//!
//! After the handshake every inbound event is a named `(sessionId, payload)`
//! pair; payloads are JSON values so that each subscriber can be handed its
//! own deep copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event carrying sequenced operations for a session.
pub const OP_EVENT: &str = "op";
/// Event carrying negative acknowledgements for submitted operations.
pub const NACK_EVENT: &str = "nack";
/// Outbound event used to submit operations.
pub const SUBMIT_OP_EVENT: &str = "submitOp";

/// Key material negotiated for encrypted sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Flags for [`crate::DocumentService::connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub encrypted: bool,
    /// Keys used when `encrypted` is set. Generation happens outside this crate.
    pub keys: Option<KeyPair>,
}

impl ConnectOptions {
    pub fn encrypted(keys: KeyPair) -> Self {
        Self {
            encrypted: true,
            keys: Some(keys),
        }
    }
}

/// Outbound handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub session_id: String,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub encrypted: bool,
}

/// Handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAck {
    pub subscriber_id: String,
    pub existing: bool,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

/// One event as it arrives on a physical listener.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub session_id: String,
    pub payload: Value,
}

/// One event as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub event: String,
    pub session_id: String,
    pub payload: Value,
}

/// An operation after the service has assigned it a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedMessage {
    #[serde(default)]
    pub client_id: Option<String>,
    pub sequence_number: u64,
    pub minimum_sequence_number: u64,
    #[serde(default)]
    pub client_sequence_number: u64,
    #[serde(default)]
    pub reference_sequence_number: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub contents: Value,
}

impl SequencedMessage {
    pub fn new(sequence_number: u64, kind: impl Into<String>, contents: Value) -> Self {
        Self {
            client_id: None,
            sequence_number,
            minimum_sequence_number: 0,
            client_sequence_number: 0,
            reference_sequence_number: 0,
            kind: kind.into(),
            contents,
        }
    }
}

/// An operation submitted by this client, before sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMessage {
    pub client_sequence_number: u64,
    pub reference_sequence_number: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub contents: Value,
}
