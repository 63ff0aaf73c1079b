//! Error types for storage access, the live transport, and session connect.

use thiserror::Error;

/// Storage errors.
///
/// `Clone` because a failed blob read is cached and the same failure is
/// handed to every caller that asks for that blob afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Malformed content in {what}: {reason}")]
    Malformed { what: String, reason: String },
    #[error("Storage task aborted: {0}")]
    Aborted(String),
}

impl StorageError {
    pub(crate) fn malformed(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            what: what.into(),
            reason: err.to_string(),
        }
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Handshake rejected: {0}")]
    Rejected(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by [`crate::DocumentService::connect`].
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Encrypted session requested without a key pair")]
    MissingKeys,
    #[error("Connect task aborted: {0}")]
    Aborted(String),
}
