//! Document store adapter interface
//!
//! The checkpointer never talks to a database directly. Each endpoint of a
//! replication is reached through a [`DocumentStore`]: a tiny get/put
//! interface over revisioned documents with optimistic concurrency.
//!
//! # Contract
//!
//! | Call | Outcome |
//! |------|---------|
//! | `get(id)` | `Ok(Some(doc))`, `Ok(None)` when the document does not exist |
//! | `put(doc)` without `_rev`, document absent | creates it |
//! | `put(doc)` with the current `_rev` | updates it, assigns a new revision |
//! | `put(doc)` with a stale or missing `_rev` | [`StoreError::Conflict`] |
//! | `put(doc)` with a `_rev`, document absent | [`StoreError::NotFound`] |
//! | endpoint refuses writes | [`StoreError::Forbidden`] |
//!
//! Adapters own timeouts and transport retries; the checkpointer only retries
//! conflicts.
//!
//! # Implementing an adapter
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use replication_checkpoint::{
//!     CheckpointDocument, CheckpointId, DocumentStore, PutResponse, StoreError,
//! };
//!
//! struct HttpStore {
//!     client: reqwest::Client,
//!     base_url: String,
//! }
//!
//! #[async_trait]
//! impl DocumentStore for HttpStore {
//!     fn name(&self) -> &str {
//!         &self.base_url
//!     }
//!
//!     async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointDocument>, StoreError> {
//!         let resp = self.client.get(format!("{}/{}", self.base_url, id)).send().await
//!             .map_err(|e| StoreError::Unavailable(e.to_string()))?;
//!         match resp.status().as_u16() {
//!             404 => Ok(None),
//!             200 => Ok(Some(resp.json().await.map_err(|e| StoreError::Other(e.to_string()))?)),
//!             code => Err(StoreError::Other(format!("unexpected status {}", code))),
//!         }
//!     }
//!
//!     async fn put(&self, doc: &CheckpointDocument) -> Result<PutResponse, StoreError> {
//!         // PUT the JSON body, map 409 to Conflict and 403 to Forbidden ...
//!         unimplemented!()
//!     }
//! }
//! ```

use crate::document::{CheckpointDocument, CheckpointId, Revision};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One side of a replication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Source,
    Target,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Source => f.write_str("source"),
            Endpoint::Target => f.write_str("target"),
        }
    }
}

/// Acknowledgement of a successful put
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub ok: bool,
    pub id: CheckpointId,
    pub rev: Revision,
}

/// Revisioned document access for one replication endpoint
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable endpoint name, used in logs
    fn name(&self) -> &str;

    /// Fetch a checkpoint document; `Ok(None)` when it does not exist
    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointDocument>, StoreError>;

    /// Create or update a checkpoint document
    ///
    /// `doc.rev` must carry the revision the update is based on (`None` to
    /// create). On success the store returns the new revision.
    async fn put(&self, doc: &CheckpointDocument) -> Result<PutResponse, StoreError>;
}

/// Optimistic-concurrency check shared by the bundled adapters
///
/// `stored` is the revision currently persisted, `incoming` the revision the
/// update claims to be based on.
pub fn check_revision(
    id: &CheckpointId,
    stored: Option<&Revision>,
    incoming: Option<&Revision>,
) -> Result<(), StoreError> {
    match (stored, incoming) {
        (None, None) => Ok(()),
        (None, Some(rev)) => Err(StoreError::NotFound(format!("{} (rev {})", id, rev))),
        (Some(current), None) => Err(StoreError::Conflict(format!(
            "{} already exists at rev {}",
            id, current
        ))),
        (Some(current), Some(rev)) if current != rev => Err(StoreError::Conflict(format!(
            "{} is at rev {}, update based on {}",
            id, current, rev
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointDocument>, StoreError> {
        (**self).get(id).await
    }

    async fn put(&self, doc: &CheckpointDocument) -> Result<PutResponse, StoreError> {
        (**self).put(doc).await
    }
}
