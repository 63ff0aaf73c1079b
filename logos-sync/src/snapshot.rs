//! Snapshot trees, versions, and the write-side tree shape.
//!
//! ```text
//! SnapshotTree
//! ├── blobs    name → Some(blob id) | None
//! ├── commits  name → reference of a nested document
//! └── trees    name → SnapshotTree
//! ```
//!
//! Maps are `BTreeMap` so every traversal visits entries in name order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recursive snapshot of a document at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotTree {
    /// Blob name → blob id. `None` marks an entry whose blob is absent.
    pub blobs: BTreeMap<String, Option<String>>,
    /// Name → reference id of a nested document.
    pub commits: BTreeMap<String, String>,
    /// Name → nested tree.
    pub trees: BTreeMap<String, SnapshotTree>,
}

impl SnapshotTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, name: impl Into<String>, blob_id: impl Into<String>) -> Self {
        self.blobs.insert(name.into(), Some(blob_id.into()));
        self
    }

    pub fn with_absent_blob(mut self, name: impl Into<String>) -> Self {
        self.blobs.insert(name.into(), None);
        self
    }

    pub fn with_commit(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.commits.insert(name.into(), reference.into());
        self
    }

    pub fn with_tree(mut self, name: impl Into<String>, tree: SnapshotTree) -> Self {
        self.trees.insert(name.into(), tree);
        self
    }

    /// Blob id stored under `name` at this level, if present.
    pub fn blob(&self, name: &str) -> Option<&str> {
        self.blobs.get(name).and_then(|id| id.as_deref())
    }

    /// Total number of blob entries in this tree and every nested tree.
    pub fn blob_count(&self) -> usize {
        self.blobs.len() + self.trees.values().map(SnapshotTree::blob_count).sum::<usize>()
    }
}

/// An immutable point in storage history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    pub tree_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Version {
    pub fn new(id: impl Into<String>, tree_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tree_id: tree_id.into(),
            message: None,
        }
    }
}

/// Descriptor returned when a blob is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBlob {
    pub id: String,
    pub url: String,
}

/// Tree contents handed to `write`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTree {
    pub entries: Vec<TreeEntry>,
}

impl WriteTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.entries.push(TreeEntry::Blob {
            path: path.into(),
            contents: contents.into(),
        });
        self
    }

    pub fn tree(mut self, path: impl Into<String>, tree: WriteTree) -> Self {
        self.entries.push(TreeEntry::Tree {
            path: path.into(),
            tree,
        });
        self
    }

    pub fn commit(mut self, path: impl Into<String>, id: impl Into<String>) -> Self {
        self.entries.push(TreeEntry::Commit {
            path: path.into(),
            id: id.into(),
        });
        self
    }
}

/// One entry of a [`WriteTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeEntry {
    Blob { path: String, contents: String },
    Tree { path: String, tree: WriteTree },
    Commit { path: String, id: String },
}
