//! Document header: the bootstrap state decoded from a snapshot tree.
//!
//! ```text
//! root
//! ├── .attributes   {"sequenceNumber": n, "minimumSequenceNumber": m}
//! ├── .messages     [SequencedMessage, ...]
//! └── <object id>/
//!     └── .attributes   {"type": "...", "sequenceNumber": n}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::protocol::SequencedMessage;
use crate::snapshot::{SnapshotTree, Version};
use crate::storage::StorageProvider;

/// Blob holding the document or object attributes.
pub const ATTRIBUTES_BLOB: &str = ".attributes";
/// Blob holding messages already applied to the snapshot.
pub const MESSAGES_BLOB: &str = ".messages";

/// The document's logical clock position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAttributes {
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(default)]
    pub minimum_sequence_number: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectAttributes {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sequence_number: u64,
}

/// A sub-object present in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedObject {
    pub id: String,
    pub kind: String,
    pub sequence_number: u64,
    pub tree: SnapshotTree,
}

/// Bootstrap state of a document at one version.
///
/// `Header::default()` is the state of a document with no stored version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub attributes: DocumentAttributes,
    pub distributed_objects: Vec<DistributedObject>,
    pub transformed_messages: Vec<SequencedMessage>,
    pub tree: Option<SnapshotTree>,
}

impl Header {
    pub fn sequence_number(&self) -> u64 {
        self.attributes.sequence_number
    }

    pub fn minimum_sequence_number(&self) -> u64 {
        self.attributes.minimum_sequence_number
    }
}

/// Read the header stored at `version`.
///
/// The tree fetch goes through `storage`, so a prefetching facade starts
/// warming `.attributes` and `.messages` before they are read here.
pub async fn read_header<S>(storage: &S, version: &Version) -> Result<Header, StorageError>
where
    S: StorageProvider + ?Sized,
{
    let tree = storage
        .get_snapshot_tree(Some(version))
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("snapshot tree for version {}", version.id)))?;

    let attributes = read_json::<DocumentAttributes, S>(storage, &tree, ATTRIBUTES_BLOB)
        .await?
        .unwrap_or_default();
    let transformed_messages = read_json::<Vec<SequencedMessage>, S>(storage, &tree, MESSAGES_BLOB)
        .await?
        .unwrap_or_default();

    let mut distributed_objects = Vec::new();
    for (id, object_tree) in &tree.trees {
        let Some(object) = read_json::<ObjectAttributes, S>(storage, object_tree, ATTRIBUTES_BLOB).await?
        else {
            continue;
        };
        distributed_objects.push(DistributedObject {
            id: id.clone(),
            kind: object.kind,
            sequence_number: object.sequence_number,
            tree: object_tree.clone(),
        });
    }

    log::debug!(
        "Header for version {}: seq {} min {} with {} objects",
        version.id,
        attributes.sequence_number,
        attributes.minimum_sequence_number,
        distributed_objects.len()
    );

    Ok(Header {
        attributes,
        distributed_objects,
        transformed_messages,
        tree: Some(tree),
    })
}

async fn read_json<T, S>(storage: &S, tree: &SnapshotTree, name: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: StorageProvider + ?Sized,
{
    let Some(blob_id) = tree.blob(name) else {
        return Ok(None);
    };
    let Some(content) = storage.read(blob_id).await? else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::malformed(name, e))
}
