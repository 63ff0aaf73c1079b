//! In-memory storage and delta backends.
//!
//! Blobs are content-addressed (UUIDv5 over the content), trees and versions
//! get random ids. Useful offline and as the backend in tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{DeltaStorage, StorageProvider};
use crate::error::StorageError;
use crate::protocol::SequencedMessage;
use crate::snapshot::{CreatedBlob, SnapshotTree, TreeEntry, Version, WriteTree};

#[derive(Default)]
struct MemoryState {
    blobs: HashMap<String, String>,
    /// tree id → tree
    trees: HashMap<String, SnapshotTree>,
    /// reference → versions, newest first
    refs: HashMap<String, Vec<Version>>,
    /// Most recently stored version across all references.
    head: Option<Version>,
}

impl MemoryState {
    fn put_blob(&mut self, content: &str) -> String {
        let id = blob_id(content);
        self.blobs.entry(id.clone()).or_insert_with(|| content.to_owned());
        id
    }

    fn put_tree(&mut self, reference: &str, tree: SnapshotTree, message: Option<String>) -> Version {
        let tree_id = Uuid::new_v4().to_string();
        let version = Version {
            id: Uuid::new_v4().to_string(),
            tree_id: tree_id.clone(),
            message,
        };
        self.trees.insert(tree_id, tree);
        self.refs
            .entry(reference.to_owned())
            .or_default()
            .insert(0, version.clone());
        self.head = Some(version.clone());
        version
    }

    fn materialize(&mut self, tree: &WriteTree) -> SnapshotTree {
        let mut snapshot = SnapshotTree::new();
        for entry in &tree.entries {
            match entry {
                TreeEntry::Blob { path, contents } => {
                    let id = self.put_blob(contents);
                    snapshot.blobs.insert(path.clone(), Some(id));
                }
                TreeEntry::Tree { path, tree } => {
                    let nested = self.materialize(tree);
                    snapshot.trees.insert(path.clone(), nested);
                }
                TreeEntry::Commit { path, id } => {
                    snapshot.commits.insert(path.clone(), id.clone());
                }
            }
        }
        snapshot
    }
}

fn blob_id(content: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string()
}

/// In-memory [`StorageProvider`].
pub struct MemoryStorage {
    repository_url: String,
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `content` and return its blob id.
    pub fn insert_blob(&self, content: &str) -> String {
        self.write_state().put_blob(content)
    }

    /// Store `tree` as the newest version of `reference`.
    pub fn insert_tree(&self, reference: &str, tree: SnapshotTree) -> Version {
        self.write_state().put_tree(reference, tree, None)
    }

    /// Number of versions recorded for `reference`.
    pub fn version_count(&self, reference: &str) -> usize {
        self.read_state().refs.get(reference).map_or(0, Vec::len)
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn repository_url(&self) -> &str {
        &self.repository_url
    }

    async fn get_snapshot_tree(
        &self,
        version: Option<&Version>,
    ) -> Result<Option<SnapshotTree>, StorageError> {
        let state = self.read_state();
        let tree_id = match version {
            Some(version) => Some(version.tree_id.as_str()),
            None => state.head.as_ref().map(|head| head.tree_id.as_str()),
        };
        Ok(tree_id.and_then(|id| state.trees.get(id).cloned()))
    }

    async fn get_versions(
        &self,
        reference: Option<&str>,
        count: usize,
    ) -> Result<Vec<Version>, StorageError> {
        let state = self.read_state();
        let versions = match reference {
            Some(reference) => state
                .refs
                .get(reference)
                .map(|versions| versions.iter().take(count).cloned().collect())
                .unwrap_or_default(),
            None => state.head.iter().take(count).cloned().collect(),
        };
        Ok(versions)
    }

    async fn read(&self, blob_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_state().blobs.get(blob_id).cloned())
    }

    async fn get_content(
        &self,
        version: &Version,
        path: &str,
    ) -> Result<Option<String>, StorageError> {
        let state = self.read_state();
        let Some(mut tree) = state.trees.get(&version.tree_id) else {
            return Err(StorageError::NotFound(format!("tree {}", version.tree_id)));
        };

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(name) = segments.pop() else {
            return Ok(None);
        };
        for segment in segments {
            match tree.trees.get(segment) {
                Some(nested) => tree = nested,
                None => return Ok(None),
            }
        }

        Ok(tree
            .blob(name)
            .and_then(|id| state.blobs.get(id))
            .cloned())
    }

    async fn write(
        &self,
        tree: &WriteTree,
        parents: &[String],
        message: &str,
        reference: &str,
    ) -> Result<Option<Version>, StorageError> {
        let mut state = self.write_state();
        let snapshot = state.materialize(tree);
        let version = state.put_tree(reference, snapshot, Some(message.to_owned()));
        log::debug!(
            "Wrote version {} of {reference} on top of {} parents",
            version.id,
            parents.len()
        );
        Ok(Some(version))
    }

    async fn create_blob(&self, content: &[u8]) -> Result<Option<CreatedBlob>, StorageError> {
        let text = std::str::from_utf8(content).map_err(|e| StorageError::malformed("blob", e))?;
        let id = self.insert_blob(text);
        let url = format!("{}/blobs/{id}", self.repository_url);
        Ok(Some(CreatedBlob { id, url }))
    }

    fn get_raw_url(&self, blob_id: &str) -> Option<String> {
        Some(format!("{}/blobs/{blob_id}", self.repository_url))
    }
}

/// In-memory [`DeltaStorage`].
#[derive(Default)]
pub struct MemoryDeltaStorage {
    sessions: RwLock<HashMap<String, Vec<SequencedMessage>>>,
}

impl MemoryDeltaStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to the log of `session_id`, keeping sequence order.
    pub fn append(&self, session_id: &str, message: SequencedMessage) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let log = sessions.entry(session_id.to_owned()).or_default();
        let at = log.partition_point(|m| m.sequence_number <= message.sequence_number);
        log.insert(at, message);
    }

    /// Number of stored messages for `session_id`.
    pub fn len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DeltaStorage for MemoryDeltaStorage {
    async fn get(
        &self,
        session_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<SequencedMessage>, StorageError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .filter(|m| m.sequence_number > from)
            .filter(|m| to.map_or(true, |to| m.sequence_number < to))
            .cloned()
            .collect())
    }
}
