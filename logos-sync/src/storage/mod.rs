//! Storage access: provider contracts, the prefetching facade, and the
//! in-memory backends.
//!
//! ```text
//! caller ──► PrefetchingStorage ──► StorageProvider (remote, per-blob latency)
//!                 │   ▲
//!      tree walk  │   │ read(blob)
//!                 ▼   │
//!            SnapshotTreeWalker ──► PrefetchCache (one read per blob id)
//! ```

pub mod cache;
pub mod memory;
pub mod prefetch;
pub mod walker;

pub use cache::{BlobRead, PrefetchCache};
pub use memory::{MemoryDeltaStorage, MemoryStorage};
pub use prefetch::PrefetchingStorage;
pub use walker::{PrefetchPlan, SnapshotTreeWalker};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::protocol::SequencedMessage;
use crate::snapshot::{CreatedBlob, SnapshotTree, Version, WriteTree};

/// Versioned blob/tree storage backing document snapshots.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Identity of the backing repository.
    fn repository_url(&self) -> &str;

    /// Snapshot tree at `version`, or at the latest version when `None`.
    async fn get_snapshot_tree(
        &self,
        version: Option<&Version>,
    ) -> Result<Option<SnapshotTree>, StorageError>;

    /// Versions reachable from `reference`, most recent first.
    async fn get_versions(
        &self,
        reference: Option<&str>,
        count: usize,
    ) -> Result<Vec<Version>, StorageError>;

    async fn read(&self, blob_id: &str) -> Result<Option<String>, StorageError>;

    async fn get_content(
        &self,
        version: &Version,
        path: &str,
    ) -> Result<Option<String>, StorageError>;

    async fn write(
        &self,
        tree: &WriteTree,
        parents: &[String],
        message: &str,
        reference: &str,
    ) -> Result<Option<Version>, StorageError>;

    async fn create_blob(&self, content: &[u8]) -> Result<Option<CreatedBlob>, StorageError>;

    fn get_raw_url(&self, blob_id: &str) -> Option<String>;
}

/// Ordered operation log per session.
#[async_trait]
pub trait DeltaStorage: Send + Sync {
    /// Messages with `from < sequence_number` and, when `to` is given,
    /// `sequence_number < to`, in sequence order.
    async fn get(
        &self,
        session_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<SequencedMessage>, StorageError>;
}
