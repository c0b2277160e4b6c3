//! In-memory document store for development and testing
//!
//! [`InMemoryDocumentStore`] is a reference implementation of the
//! [`DocumentStore`] trait. Documents are kept as JSON values, so every
//! checkpoint goes through the same serialization a remote database would
//! see and the stored field names can be inspected with
//! [`InMemoryDocumentStore::get_raw`].
//!
//! Revisions follow the `0-N` scheme of endpoint-local documents: the first
//! write of a document yields `0-1`, the next `0-2`, and so on.
//!
//! # Fault injection
//!
//! Tests drive the checkpointer through partial failures with:
//!
//! - [`set_read_only`](InMemoryDocumentStore::set_read_only) - every put fails with
//!   [`StoreError::Forbidden`]
//! - [`set_unavailable`](InMemoryDocumentStore::set_unavailable) - every get and put
//!   fails with [`StoreError::Unavailable`]
//! - [`fail_next_put`](InMemoryDocumentStore::fail_next_put) - queue an error for
//!   the next put only
//!
//! # Example
//!
//! ```rust
//! use replication_checkpoint::{
//!     CheckpointDocument, CheckpointId, DocumentStore, InMemoryDocumentStore, Seq, SessionId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryDocumentStore::new("target");
//!     let id = CheckpointId::new("replication-1")?;
//!
//!     let mut doc = CheckpointDocument::new(id.clone());
//!     doc.record(&SessionId::from("session-1"), Seq::from(1));
//!     let response = store.put(&doc).await?;
//!     assert_eq!(response.rev.as_str(), "0-1");
//!
//!     let stored = store.get(&id).await?.unwrap();
//!     assert_eq!(stored.last_seq, Some(Seq::from(1)));
//!     Ok(())
//! }
//! ```

use crate::document::{CheckpointDocument, CheckpointId, Revision};
use crate::error::StoreError;
use crate::store::{check_revision, DocumentStore, PutResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Thread-safe in-memory document storage
type DocumentStorage = Arc<RwLock<HashMap<String, serde_json::Value>>>;

#[derive(Debug, Default)]
struct Faults {
    read_only: AtomicBool,
    unavailable: AtomicBool,
    queued: Mutex<VecDeque<StoreError>>,
}

/// In-memory checkpoint document store
///
/// Clones share the same storage, so a test can hand one clone to a
/// checkpointer and inspect or tamper with documents through another.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    name: String,
    storage: DocumentStorage,
    faults: Arc<Faults>,
    puts: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl InMemoryDocumentStore {
    /// Create an empty store named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(Faults::default()),
            puts: Arc::new(AtomicUsize::new(0)),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful puts since creation
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of gets served since creation, including misses
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of stored documents
    pub async fn document_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Stored JSON of a document, exactly as persisted
    pub async fn get_raw(&self, id: &CheckpointId) -> Option<serde_json::Value> {
        self.storage.read().await.get(id.as_str()).cloned()
    }

    /// Delete all documents
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    /// Refuse every write with [`StoreError::Forbidden`]
    pub fn set_read_only(&self, read_only: bool) {
        self.faults.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Fail every read and write with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next put with `error`
    pub fn fail_next_put(&self, error: StoreError) {
        if let Ok(mut queued) = self.faults.queued.lock() {
            queued.push_back(error);
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn take_queued_failure(&self) -> Option<StoreError> {
        self.faults.queued.lock().ok()?.pop_front()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointDocument>, StoreError> {
        self.check_available()?;
        self.gets.fetch_add(1, Ordering::SeqCst);

        let storage = self.storage.read().await;
        match storage.get(id.as_str()) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, doc: &CheckpointDocument) -> Result<PutResponse, StoreError> {
        self.check_available()?;
        if let Some(error) = self.take_queued_failure() {
            return Err(error);
        }
        if self.faults.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Forbidden(format!("{} is read-only", self.name)));
        }

        let mut storage = self.storage.write().await;

        let stored_rev = storage
            .get(doc.id.as_str())
            .and_then(|value| value.get("_rev"))
            .and_then(|rev| rev.as_str())
            .map(Revision::new);
        check_revision(&doc.id, stored_rev.as_ref(), doc.rev.as_ref())?;

        let rev = Revision::next_local(stored_rev.as_ref());
        let mut stored = doc.clone();
        stored.rev = Some(rev.clone());
        storage.insert(doc.id.as_str().to_string(), serde_json::to_value(&stored)?);
        self.puts.fetch_add(1, Ordering::SeqCst);

        Ok(PutResponse {
            ok: true,
            id: doc.id.clone(),
            rev,
        })
    }
}
