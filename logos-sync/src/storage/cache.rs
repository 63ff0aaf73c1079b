//! Deduplicating blob read cache.
//!
//! Each entry is a shared handle to a spawned read, stored before the read
//! settles, so every requester of the same blob id awaits the same result.
//! Failed reads are cached exactly like successful ones: a blob that keeps
//! failing is not re-queried until the cache is disabled.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::StorageError;

/// Result of one blob read.
pub type BlobContent = Result<Option<String>, StorageError>;

/// A read in flight or completed, awaitable by any number of callers.
pub type BlobRead = Shared<BoxFuture<'static, BlobContent>>;

struct CacheState {
    enabled: bool,
    entries: HashMap<String, BlobRead>,
}

/// Blob id → in-flight-or-completed read.
pub struct PrefetchCache {
    state: Mutex<CacheState>,
}

impl PrefetchCache {
    /// Create an enabled cache.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create a cache that starts disabled and passes every read through.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            state: Mutex::new(CacheState {
                enabled,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `blob_id`, calling `fetch` only when no entry exists.
    ///
    /// Lookup and insert happen under one lock acquisition. When enabled, the
    /// fetch is spawned immediately, so dropping the returned future does not
    /// stop the read. When disabled, the fetch is returned as-is and nothing
    /// is cached.
    pub fn read<F, Fut>(&self, blob_id: &str, fetch: F) -> BoxFuture<'static, BlobContent>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BlobContent> + Send + 'static,
    {
        let mut state = self.lock();
        if !state.enabled {
            drop(state);
            return fetch().boxed();
        }

        if let Some(existing) = state.entries.get(blob_id) {
            return existing.clone().boxed();
        }

        let read = spawn_read(fetch());
        state.entries.insert(blob_id.to_owned(), read.clone());
        read.boxed()
    }

    /// Disable caching and drop every entry.
    ///
    /// Reads already in flight keep running; their results are simply never
    /// handed out again.
    pub fn disable(&self) {
        let mut state = self.lock();
        state.enabled = false;
        let dropped = state.entries.len();
        state.entries.clear();
        log::debug!("Prefetch cache disabled, {dropped} entries discarded");
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PrefetchCache {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_read<Fut>(fetch: Fut) -> BlobRead
where
    Fut: Future<Output = BlobContent> + Send + 'static,
{
    let handle = tokio::spawn(fetch);
    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(StorageError::Aborted(e.to_string())))
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;

    /// Fetch closure factory: counts invocations, waits for the gate to open.
    fn gated_fetch(
        calls: Arc<AtomicUsize>,
        gate: watch::Receiver<bool>,
        result: BlobContent,
    ) -> impl FnOnce() -> BoxFuture<'static, BlobContent> {
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut gate = gate;
                let _ = gate.wait_for(|open| *open).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (open, gate) = watch::channel(false);

        let reads: Vec<_> = (0..8)
            .map(|_| {
                cache.read(
                    "b1",
                    gated_fetch(calls.clone(), gate.clone(), Ok(Some("hello".into()))),
                )
            })
            .collect();
        assert_eq!(cache.len(), 1);

        open.send(true).unwrap();
        let results = futures_util::future::join_all(reads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, Ok(Some("hello".into())));
        }
    }

    #[tokio::test]
    async fn test_resolved_entry_is_reused() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_open, gate) = watch::channel(true);

        let first = cache
            .read("b1", gated_fetch(calls.clone(), gate.clone(), Ok(Some("v".into()))))
            .await;
        let second = cache
            .read("b1", gated_fetch(calls.clone(), gate.clone(), Ok(Some("other".into()))))
            .await;

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_read_is_cached() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_open, gate) = watch::channel(true);
        let failure = Err(StorageError::Backend("boom".into()));

        let first = cache
            .read("bad", gated_fetch(calls.clone(), gate.clone(), failure.clone()))
            .await;
        let second = cache
            .read("bad", gated_fetch(calls.clone(), gate.clone(), Ok(Some("ok".into()))))
            .await;

        assert_eq!(first, failure);
        assert_eq!(second, failure);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disable_clears_and_bypasses() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_open, gate) = watch::channel(true);

        cache
            .read("b1", gated_fetch(calls.clone(), gate.clone(), Ok(Some("v1".into()))))
            .await
            .unwrap();
        cache.disable();
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());

        let after = cache
            .read("b1", gated_fetch(calls.clone(), gate.clone(), Ok(Some("v2".into()))))
            .await;
        assert_eq!(after, Ok(Some("v2".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty(), "disabled cache must not repopulate");
    }

    #[tokio::test]
    async fn test_disable_does_not_cancel_in_flight_read() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (open, gate) = watch::channel(false);

        let pending = cache.read("b1", gated_fetch(calls.clone(), gate, Ok(Some("late".into()))));
        cache.disable();
        open.send(true).unwrap();

        assert_eq!(pending.await, Ok(Some("late".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_read_still_runs() {
        let cache = PrefetchCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_open, gate) = watch::channel(true);

        drop(cache.read("b1", gated_fetch(calls.clone(), gate.clone(), Ok(None))));
        let value = cache
            .read("b1", gated_fetch(calls.clone(), gate, Ok(Some("x".into()))))
            .await;

        assert_eq!(value, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_constructor() {
        let cache = PrefetchCache::disabled();
        assert!(!cache.is_enabled());
        assert!(PrefetchCache::default().is_enabled());
    }
}
