//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use logos_sync::{
    ConnectAck, ConnectRequest, CreatedBlob, DeltaStorage, InboundEvent, MemoryDeltaStorage,
    MemoryStorage, SequencedMessage, SnapshotTree, StorageError, StorageProvider, Transport,
    TransportError, Version, WriteTree,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

/// Transport answering every handshake with a fixed result.
///
/// Encrypted handshakes get their keys echoed back in the acknowledgement.
pub struct ScriptedTransport {
    ack: Result<ConnectAck, TransportError>,
    gate: Option<watch::Receiver<bool>>,
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<InboundEvent>>>>,
    listen_calls: AtomicUsize,
    requests: Mutex<Vec<ConnectRequest>>,
    emitted: Mutex<Vec<(String, String, Value)>>,
}

impl ScriptedTransport {
    pub fn accepting(subscriber_id: &str, existing: bool) -> Self {
        Self::with_result(Ok(ConnectAck {
            subscriber_id: subscriber_id.to_owned(),
            existing,
            private_key: None,
            public_key: None,
        }))
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::with_result(Err(TransportError::Rejected(reason.to_owned())))
    }

    fn with_result(ack: Result<ConnectAck, TransportError>) -> Self {
        Self {
            ack,
            gate: None,
            listeners: Mutex::new(HashMap::new()),
            listen_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
        }
    }

    /// Hold every handshake until `gate` turns true.
    pub fn gated(mut self, gate: watch::Receiver<bool>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Handshakes received so far.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> Vec<(String, String, Value)> {
        self.emitted.lock().unwrap().clone()
    }

    /// Deliver an inbound event to every listener of `event`.
    pub fn push(&self, event: &str, session_id: &str, payload: Value) {
        let listeners = self.listeners.lock().unwrap();
        for tx in listeners.get(event).into_iter().flatten() {
            let _ = tx.send(InboundEvent {
                session_id: session_id.to_owned(),
                payload: payload.clone(),
            });
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect_document(&self, request: ConnectRequest) -> Result<ConnectAck, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        self.ack.clone().map(|mut ack| {
            if request.encrypted {
                ack.private_key = request.private_key;
                ack.public_key = request.public_key;
            }
            ack
        })
    }

    fn listen(&self, event: &str) -> mpsc::UnboundedReceiver<InboundEvent> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap()
            .entry(event.to_owned())
            .or_default()
            .push(tx);
        rx
    }

    async fn emit(&self, event: &str, session_id: &str, payload: Value) -> Result<(), TransportError> {
        self.emitted
            .lock()
            .unwrap()
            .push((event.to_owned(), session_id.to_owned(), payload));
        Ok(())
    }
}

/// [`MemoryStorage`] with call counting, failure injection and a read gate.
pub struct InstrumentedStorage {
    pub memory: MemoryStorage,
    reads: Mutex<HashMap<String, usize>>,
    read_order: Mutex<Vec<String>>,
    completed: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
    tree_failure: Mutex<Option<StorageError>>,
    version_calls: AtomicUsize,
}

impl InstrumentedStorage {
    pub fn new() -> Self {
        Self {
            memory: MemoryStorage::new("mem://instrumented"),
            reads: Mutex::new(HashMap::new()),
            read_order: Mutex::new(Vec::new()),
            completed: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            tree_failure: Mutex::new(None),
            version_calls: AtomicUsize::new(0),
        }
    }

    /// Hold every blob read until `gate` turns true.
    pub fn gate_reads(&self, gate: watch::Receiver<bool>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    /// Make reads of `blob_id` fail with a backend error.
    pub fn fail_blob(&self, blob_id: &str) {
        self.failing.lock().unwrap().insert(blob_id.to_owned());
    }

    /// Make every snapshot tree fetch fail with `error`.
    pub fn fail_trees(&self, error: StorageError) {
        *self.tree_failure.lock().unwrap() = Some(error);
    }

    /// Backend reads issued for `blob_id` so far.
    pub fn reads_of(&self, blob_id: &str) -> usize {
        self.reads.lock().unwrap().get(blob_id).copied().unwrap_or(0)
    }

    /// Backend reads that have returned for `blob_id`.
    pub fn completed_reads_of(&self, blob_id: &str) -> usize {
        self.completed.lock().unwrap().get(blob_id).copied().unwrap_or(0)
    }

    /// Blob ids in the order their backend reads started.
    pub fn read_order(&self) -> Vec<String> {
        self.read_order.lock().unwrap().clone()
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvider for InstrumentedStorage {
    fn repository_url(&self) -> &str {
        self.memory.repository_url()
    }

    async fn get_snapshot_tree(
        &self,
        version: Option<&Version>,
    ) -> Result<Option<SnapshotTree>, StorageError> {
        let failure = self.tree_failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.memory.get_snapshot_tree(version).await
    }

    async fn get_versions(
        &self,
        reference: Option<&str>,
        count: usize,
    ) -> Result<Vec<Version>, StorageError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.memory.get_versions(reference, count).await
    }

    async fn read(&self, blob_id: &str) -> Result<Option<String>, StorageError> {
        *self.reads.lock().unwrap().entry(blob_id.to_owned()).or_default() += 1;
        self.read_order.lock().unwrap().push(blob_id.to_owned());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        let result = if self.failing.lock().unwrap().contains(blob_id) {
            Err(StorageError::Backend(format!("read of {blob_id} failed")))
        } else {
            self.memory.read(blob_id).await
        };
        *self.completed.lock().unwrap().entry(blob_id.to_owned()).or_default() += 1;
        result
    }

    async fn get_content(
        &self,
        version: &Version,
        path: &str,
    ) -> Result<Option<String>, StorageError> {
        self.memory.get_content(version, path).await
    }

    async fn write(
        &self,
        tree: &WriteTree,
        parents: &[String],
        message: &str,
        reference: &str,
    ) -> Result<Option<Version>, StorageError> {
        self.memory.write(tree, parents, message, reference).await
    }

    async fn create_blob(&self, content: &[u8]) -> Result<Option<CreatedBlob>, StorageError> {
        self.memory.create_blob(content).await
    }

    fn get_raw_url(&self, blob_id: &str) -> Option<String> {
        self.memory.get_raw_url(blob_id)
    }
}

/// [`MemoryDeltaStorage`] counting fetches that have returned.
pub struct CountingDeltaStorage {
    pub memory: MemoryDeltaStorage,
    completed: AtomicUsize,
}

impl CountingDeltaStorage {
    pub fn new() -> Self {
        Self {
            memory: MemoryDeltaStorage::new(),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed_fetches(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeltaStorage for CountingDeltaStorage {
    async fn get(
        &self,
        session_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<SequencedMessage>, StorageError> {
        let result = self.memory.get(session_id, from, to).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
