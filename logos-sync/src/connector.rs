//! Session connect: header, pending deltas and live handshake, joined into
//! one [`Document`].
//!
//! ```text
//!            ┌─ header (version? → read_header : default) ─► pending deltas (from seq) ─┐
//! connect ───┤                                                                          ├─► Document
//!            └─ key setup ─► connect request ─► ack ────────────────────────────────────┘
//! ```
//!
//! Both branches run as spawned tasks. The join fails on the first error;
//! the other branch is detached and runs to completion with its result
//! discarded.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::connection::DocumentConnection;
use crate::error::{ConnectError, StorageError};
use crate::header::{read_header, DistributedObject, Header};
use crate::protocol::{ConnectOptions, ConnectRequest, SequencedMessage};
use crate::routing::ConnectionRegistry;
use crate::snapshot::{CreatedBlob, SnapshotTree, Version, WriteTree};
use crate::storage::{DeltaStorage, PrefetchingStorage, StorageProvider};
use crate::transport::Transport;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Start with blob prefetching enabled.
    pub prefetch: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { prefetch: true }
    }
}

/// Long-lived entry point owning the storage facade and the routing table.
pub struct DocumentService {
    storage: PrefetchingStorage,
    delta_storage: Arc<dyn DeltaStorage>,
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
}

impl DocumentService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        delta_storage: Arc<dyn DeltaStorage>,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(transport.clone()));
        Self {
            storage: PrefetchingStorage::with_prefetch(storage, config.prefetch),
            delta_storage,
            transport,
            registry,
        }
    }

    pub fn storage(&self) -> &PrefetchingStorage {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Disable blob prefetching for every document of this service.
    pub fn stop_prefetch(&self) {
        self.storage.stop_prefetch();
    }

    /// Connect to `session_id` at `version`, or to a fresh header when
    /// `version` is `None`.
    pub async fn connect(
        &self,
        session_id: &str,
        version: Option<&Version>,
        options: ConnectOptions,
    ) -> Result<Document, ConnectError> {
        let state_task = tokio::spawn({
            let storage = self.storage.clone();
            let delta_storage = self.delta_storage.clone();
            let session_id = session_id.to_owned();
            let version = version.cloned();
            async move {
                let header = match &version {
                    Some(version) => read_header(&storage, version).await?,
                    None => Header::default(),
                };
                let pending = delta_storage
                    .get(&session_id, header.sequence_number(), None)
                    .await?;
                Ok::<_, ConnectError>((header, pending))
            }
        });

        let handshake_task = tokio::spawn({
            let transport = self.transport.clone();
            let session_id = session_id.to_owned();
            async move {
                let request = connect_request(session_id, &options)?;
                let ack = transport.connect_document(request).await?;
                Ok::<_, ConnectError>(ack)
            }
        });

        let joined = tokio::try_join!(join_branch(state_task), join_branch(handshake_task));
        let ((header, pending_deltas), ack) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Connect to {session_id} failed: {e}");
                return Err(e);
            }
        };

        log::info!(
            "Connected to {session_id} as {} (existing: {}, seq {}, {} pending deltas)",
            ack.subscriber_id,
            ack.existing,
            header.sequence_number(),
            pending_deltas.len()
        );

        let version = version.cloned();
        let Header {
            attributes,
            distributed_objects,
            transformed_messages,
            tree: _,
        } = header;

        Ok(Document {
            session_id: session_id.to_owned(),
            subscriber_id: ack.subscriber_id.clone(),
            existing: ack.existing,
            storage: DocumentStorage {
                session_id: session_id.to_owned(),
                version: version.clone(),
                storage: self.storage.clone(),
            },
            delta_storage: DocumentDeltaStorage {
                session_id: session_id.to_owned(),
                delta_storage: self.delta_storage.clone(),
            },
            connection: DocumentConnection::new(
                session_id.to_owned(),
                ack,
                self.transport.clone(),
                self.registry.clone(),
            ),
            version,
            distributed_objects,
            pending_deltas,
            transformed_messages,
            sequence_number: attributes.sequence_number,
            minimum_sequence_number: attributes.minimum_sequence_number,
        })
    }
}

async fn join_branch<T>(handle: JoinHandle<Result<T, ConnectError>>) -> Result<T, ConnectError> {
    handle
        .await
        .map_err(|e| ConnectError::Aborted(e.to_string()))?
}

/// Build the handshake, attaching keys for encrypted sessions.
fn connect_request(
    session_id: String,
    options: &ConnectOptions,
) -> Result<ConnectRequest, ConnectError> {
    let (private_key, public_key) = if options.encrypted {
        let keys = options.keys.as_ref().ok_or(ConnectError::MissingKeys)?;
        (Some(keys.private_key.clone()), Some(keys.public_key.clone()))
    } else {
        (None, None)
    };
    Ok(ConnectRequest {
        session_id,
        private_key,
        public_key,
        encrypted: options.encrypted,
    })
}

/// A connected session.
///
/// Built once by [`DocumentService::connect`] and owned by its caller.
#[derive(Debug)]
pub struct Document {
    pub session_id: String,
    pub subscriber_id: String,
    /// Whether the session already existed on the service.
    pub existing: bool,
    pub version: Option<Version>,
    pub connection: DocumentConnection,
    pub storage: DocumentStorage,
    pub delta_storage: DocumentDeltaStorage,
    pub distributed_objects: Vec<DistributedObject>,
    /// Deltas after the header's sequence number.
    pub pending_deltas: Vec<SequencedMessage>,
    pub transformed_messages: Vec<SequencedMessage>,
    pub sequence_number: u64,
    pub minimum_sequence_number: u64,
}

/// Storage bound to one session and version.
#[derive(Clone)]
pub struct DocumentStorage {
    session_id: String,
    version: Option<Version>,
    storage: PrefetchingStorage,
}

impl DocumentStorage {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn repository_url(&self) -> &str {
        self.storage.repository_url()
    }

    pub async fn get_snapshot_tree(&self) -> Result<Option<SnapshotTree>, StorageError> {
        self.storage.get_snapshot_tree(self.version.as_ref()).await
    }

    /// Most recent versions of this session, newest first.
    pub async fn get_versions(&self, count: usize) -> Result<Vec<Version>, StorageError> {
        self.storage.get_versions(Some(&self.session_id), count).await
    }

    pub async fn read(&self, blob_id: &str) -> Result<Option<String>, StorageError> {
        self.storage.read(blob_id).await
    }

    /// Content at `path` in the bound version. `None` without a version.
    pub async fn get_content(&self, path: &str) -> Result<Option<String>, StorageError> {
        match &self.version {
            Some(version) => self.storage.get_content(version, path).await,
            None => Ok(None),
        }
    }

    /// Write `tree` as a new version of this session on top of the bound version.
    pub async fn write(&self, tree: &WriteTree, message: &str) -> Result<Option<Version>, StorageError> {
        let parents: Vec<String> = self.version.iter().map(|v| v.id.clone()).collect();
        self.storage
            .write(tree, &parents, message, &self.session_id)
            .await
    }

    pub async fn create_blob(&self, content: &[u8]) -> Result<Option<CreatedBlob>, StorageError> {
        self.storage.create_blob(content).await
    }

    pub fn raw_url(&self, blob_id: &str) -> Option<String> {
        self.storage.get_raw_url(blob_id)
    }
}

impl std::fmt::Debug for DocumentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStorage")
            .field("session_id", &self.session_id)
            .field("version", &self.version)
            .field("repository_url", &self.storage.repository_url())
            .finish()
    }
}

/// Delta log bound to one session.
#[derive(Clone)]
pub struct DocumentDeltaStorage {
    session_id: String,
    delta_storage: Arc<dyn DeltaStorage>,
}

impl DocumentDeltaStorage {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deltas with `from < seq` and, when given, `seq < to`.
    pub async fn get(&self, from: u64, to: Option<u64>) -> Result<Vec<SequencedMessage>, StorageError> {
        self.delta_storage.get(&self.session_id, from, to).await
    }
}

impl std::fmt::Debug for DocumentDeltaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentDeltaStorage")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
