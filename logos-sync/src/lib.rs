//! # logos-sync — Client-side document synchronization for Logos
//!
//! Sits between application code and two remote services: a git-like
//! blob/tree store holding document snapshots, and a live transport carrying
//! the operation stream.
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!   connect() ──────► │ DocumentService  │
//!                     └───┬──────────┬───┘
//!              header +   │          │  handshake
//!              deltas     ▼          ▼
//!      ┌────────────────────┐   ┌────────────────────┐
//!      │ PrefetchingStorage │   │ Transport          │
//!      │  └ PrefetchCache   │   │ (one connection)   │
//!      │  └ TreeWalker      │   └─────────┬──────────┘
//!      └─────────┬──────────┘             │ named events
//!                ▼                        ▼
//!      ┌────────────────────┐   ┌────────────────────┐
//!      │ StorageProvider    │   │ ConnectionRegistry │ ──► subscribers
//!      └────────────────────┘   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`] — provider contracts, prefetch cache, tree walker, facade,
//!   in-memory backends
//! - [`header`] — decoding a snapshot tree into a [`Header`]
//! - [`transport`] — transport contract and the WebSocket adapter
//! - [`routing`] — event → session → subscriber routing table
//! - [`connection`] — live per-session connection handle
//! - [`connector`] — [`DocumentService::connect`] and the [`Document`] it builds

pub mod connection;
pub mod connector;
pub mod error;
pub mod header;
pub mod protocol;
pub mod routing;
pub mod snapshot;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use connection::DocumentConnection;
pub use connector::{
    Document, DocumentDeltaStorage, DocumentService, DocumentStorage, ServiceConfig,
};
pub use error::{ConnectError, StorageError, TransportError};
pub use header::{read_header, DistributedObject, DocumentAttributes, Header};
pub use protocol::{
    ConnectAck, ConnectOptions, ConnectRequest, DocumentMessage, InboundEvent, KeyPair,
    RoutedEvent, SequencedMessage, NACK_EVENT, OP_EVENT, SUBMIT_OP_EVENT,
};
pub use routing::{ConnectionRegistry, RegistryStats, Subscriber};
pub use snapshot::{CreatedBlob, SnapshotTree, TreeEntry, Version, WriteTree};
pub use storage::{
    DeltaStorage, MemoryDeltaStorage, MemoryStorage, PrefetchCache, PrefetchPlan,
    PrefetchingStorage, SnapshotTreeWalker, StorageProvider,
};
pub use transport::{Transport, WsTransport};
