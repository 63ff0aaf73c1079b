//! Prefetching decorator over a [`StorageProvider`].
//!
//! Every successful snapshot-tree fetch starts a detached walk that warms the
//! cache; the tree is returned to the caller without waiting for any of it.
//! Blob reads go through the [`PrefetchCache`] until [`stop_prefetch`] is
//! called, after which the facade is a plain pass-through.
//!
//! [`stop_prefetch`]: PrefetchingStorage::stop_prefetch

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

use super::cache::{BlobContent, PrefetchCache};
use super::walker::SnapshotTreeWalker;
use super::StorageProvider;
use crate::error::StorageError;
use crate::snapshot::{CreatedBlob, SnapshotTree, Version, WriteTree};

/// Nested document references already prefetched by one walk.
type VisitedRefs = Arc<Mutex<HashSet<String>>>;

/// Storage facade with read deduplication and tree prefetch.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct PrefetchingStorage {
    inner: Arc<dyn StorageProvider>,
    cache: Arc<PrefetchCache>,
}

impl PrefetchingStorage {
    /// Wrap `inner` with prefetching enabled.
    pub fn new(inner: Arc<dyn StorageProvider>) -> Self {
        Self::with_prefetch(inner, true)
    }

    /// Wrap `inner`, choosing whether prefetching starts enabled.
    pub fn with_prefetch(inner: Arc<dyn StorageProvider>, enabled: bool) -> Self {
        let cache = if enabled {
            PrefetchCache::new()
        } else {
            PrefetchCache::disabled()
        };
        Self {
            inner,
            cache: Arc::new(cache),
        }
    }

    /// Disable and clear the cache for the lifetime of this facade.
    pub fn stop_prefetch(&self) {
        self.cache.disable();
        log::info!("Prefetch stopped for {}", self.inner.repository_url());
    }

    pub fn is_prefetching(&self) -> bool {
        self.cache.is_enabled()
    }

    pub fn cache(&self) -> &PrefetchCache {
        &self.cache
    }

    fn cached_read(&self, blob_id: &str) -> BoxFuture<'static, BlobContent> {
        let inner = self.inner.clone();
        let id = blob_id.to_owned();
        self.cache
            .read(blob_id, move || async move { inner.read(&id).await })
    }

    /// Issue a read without waiting for it. The read runs on its own task.
    fn issue(&self, blob_id: &str) {
        drop(self.cached_read(blob_id));
    }

    fn prefetch_tree(&self, tree: &SnapshotTree, visited: &VisitedRefs) {
        if !self.cache.is_enabled() {
            return;
        }

        let plan = SnapshotTreeWalker::plan(tree);
        log::debug!(
            "Prefetching {} eager, {} secondary blobs and {} nested documents",
            plan.eager.len(),
            plan.secondary.len(),
            plan.commits.len()
        );

        for blob_id in &plan.eager {
            self.issue(blob_id);
        }
        for reference in plan.commits {
            self.prefetch_commit(reference, visited);
        }
        for blob_id in &plan.secondary {
            self.issue(blob_id);
        }
    }

    /// Each nested reference is prefetched at most once per walk.
    fn prefetch_commit(&self, reference: String, visited: &VisitedRefs) {
        let first_visit = visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone());
        if !first_visit {
            log::debug!("Nested document {reference} already prefetched in this walk");
            return;
        }

        let document = self.clone().prefetch_document(reference.clone(), visited.clone());
        tokio::spawn(async move {
            if let Err(e) = document.await {
                log::warn!("Prefetch of nested document {reference} failed: {e}");
            }
        });
    }

    fn prefetch_document(
        self,
        reference: String,
        visited: VisitedRefs,
    ) -> BoxFuture<'static, Result<(), StorageError>> {
        async move {
            let versions = self.inner.get_versions(Some(&reference), 1).await?;
            let Some(latest) = versions.into_iter().next() else {
                log::debug!("Nested document {reference} has no versions");
                return Ok(());
            };
            if let Some(tree) = self.inner.get_snapshot_tree(Some(&latest)).await? {
                self.prefetch_tree(&tree, &visited);
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl StorageProvider for PrefetchingStorage {
    fn repository_url(&self) -> &str {
        self.inner.repository_url()
    }

    async fn get_snapshot_tree(
        &self,
        version: Option<&Version>,
    ) -> Result<Option<SnapshotTree>, StorageError> {
        let tree = self.inner.get_snapshot_tree(version).await?;
        if let Some(tree) = &tree {
            self.prefetch_tree(tree, &VisitedRefs::default());
        }
        Ok(tree)
    }

    async fn get_versions(
        &self,
        reference: Option<&str>,
        count: usize,
    ) -> Result<Vec<Version>, StorageError> {
        self.inner.get_versions(reference, count).await
    }

    async fn read(&self, blob_id: &str) -> Result<Option<String>, StorageError> {
        self.cached_read(blob_id).await
    }

    async fn get_content(
        &self,
        version: &Version,
        path: &str,
    ) -> Result<Option<String>, StorageError> {
        self.inner.get_content(version, path).await
    }

    async fn write(
        &self,
        tree: &WriteTree,
        parents: &[String],
        message: &str,
        reference: &str,
    ) -> Result<Option<Version>, StorageError> {
        self.inner.write(tree, parents, message, reference).await
    }

    async fn create_blob(&self, content: &[u8]) -> Result<Option<CreatedBlob>, StorageError> {
        self.inner.create_blob(content).await
    }

    fn get_raw_url(&self, blob_id: &str) -> Option<String> {
        self.inner.get_raw_url(blob_id)
    }
}
