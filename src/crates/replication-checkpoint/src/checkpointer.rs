//! Dual-endpoint checkpoint writer and resume-point reader
//!
//! A [`Checkpointer`] owns the checkpoint documents of one replication job on
//! both endpoints. The replication driver calls
//! [`write_checkpoint`](Checkpointer::write_checkpoint) after each batch has
//! been durably applied to the target, and
//! [`get_checkpoint`](Checkpointer::get_checkpoint) before starting or
//! resuming to learn where to continue.
//!
//! # Write ordering
//!
//! There is no transaction spanning the two endpoints. Each write is an
//! independent optimistic-concurrency upsert, and the target is always
//! written (and its outcome known) before the source is touched. A crash
//! between the two leaves the target ahead of the source, never behind, which
//! is exactly what [`reconcile`](crate::reconcile::reconcile) relies on when it
//! lets the source cursor win a same-session tie. The two rules are one
//! invariant; see the [`reconcile`](crate::reconcile) module.
//!
//! # Example
//!
//! ```rust
//! use replication_checkpoint::{
//!     Checkpointer, CheckpointerOptions, CheckpointId, InMemoryDocumentStore, Seq, SessionId,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(InMemoryDocumentStore::new("source"));
//!     let target = Arc::new(InMemoryDocumentStore::new("target"));
//!     let mut checkpointer = Checkpointer::new(
//!         source,
//!         target,
//!         CheckpointId::new("replication-1")?,
//!         serde_json::Value::Null,
//!         CheckpointerOptions::default(),
//!     );
//!
//!     assert_eq!(checkpointer.get_checkpoint().await?, Seq::LOWEST);
//!
//!     let session = SessionId::generate();
//!     checkpointer.write_checkpoint(Seq::from(42), &session).await?;
//!     assert_eq!(checkpointer.get_checkpoint().await?, Seq::from(42));
//!     Ok(())
//! }
//! ```

use crate::config::CheckpointerOptions;
use crate::document::{CheckpointDocument, CheckpointId, Seq, SessionId};
use crate::error::{CheckpointError, Result, StoreError};
use crate::reconcile::{reconcile, Basis, Reconciliation};
use crate::store::{DocumentStore, Endpoint, PutResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of [`Checkpointer::write_checkpoint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// At least one endpoint was updated; carries the last put's response
    Written(PutResponse),
    /// The enabled endpoints already record this cursor
    Unchanged,
    /// Neither endpoint keeps checkpoints
    NothingWritten,
    /// The replication was cancelled; no store was touched
    Cancelled,
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written(_))
    }

    /// Response of the last put, if any
    pub fn response(&self) -> Option<&PutResponse> {
        match self {
            WriteResult::Written(response) => Some(response),
            _ => None,
        }
    }
}

/// Writes and reconciles the checkpoints of one replication job
pub struct Checkpointer {
    source: Arc<dyn DocumentStore>,
    target: Arc<dyn DocumentStore>,
    id: CheckpointId,
    replication_options: serde_json::Value,
    options: CheckpointerOptions,
    cancelled: Arc<AtomicBool>,
    last_written: Option<Seq>,
    source_doc: Option<CheckpointDocument>,
    target_doc: Option<CheckpointDocument>,
}

impl std::fmt::Debug for Checkpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpointer")
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("id", &self.id)
            .field("options", &self.options)
            .field("last_written", &self.last_written)
            .finish()
    }
}

impl Checkpointer {
    /// Create a checkpointer for the replication identified by `id`
    ///
    /// `replication_options` is the replication's own configuration (filters,
    /// doc ids, ...). It is kept for the driver and never interpreted here.
    pub fn new(
        source: Arc<dyn DocumentStore>,
        target: Arc<dyn DocumentStore>,
        id: CheckpointId,
        replication_options: serde_json::Value,
        options: CheckpointerOptions,
    ) -> Self {
        Self {
            source,
            target,
            id,
            replication_options,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
            last_written: None,
            source_doc: None,
            target_doc: None,
        }
    }

    pub fn id(&self) -> &CheckpointId {
        &self.id
    }

    pub fn source(&self) -> &dyn DocumentStore {
        self.source.as_ref()
    }

    pub fn target(&self) -> &dyn DocumentStore {
        self.target.as_ref()
    }

    /// Current options; `write_source_checkpoint` turns off once the source
    /// turns out to be read-only
    pub fn options(&self) -> &CheckpointerOptions {
        &self.options
    }

    pub fn replication_options(&self) -> &serde_json::Value {
        &self.replication_options
    }

    /// Flag that, once set, turns every further write into a no-op
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn enabled(&self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Source => self.options.write_source_checkpoint,
            Endpoint::Target => self.options.write_target_checkpoint,
        }
    }

    fn store(&self, endpoint: Endpoint) -> Arc<dyn DocumentStore> {
        match endpoint {
            Endpoint::Source => Arc::clone(&self.source),
            Endpoint::Target => Arc::clone(&self.target),
        }
    }

    fn cache_mut(&mut self, endpoint: Endpoint) -> &mut Option<CheckpointDocument> {
        match endpoint {
            Endpoint::Source => &mut self.source_doc,
            Endpoint::Target => &mut self.target_doc,
        }
    }

    /// Record that replication reached `seq` during `session_id`
    ///
    /// Writes the target first, then the source. A failure on one endpoint
    /// does not stop the other from being written; the first failure is
    /// returned once both have been attempted. Calling again with a cursor
    /// this checkpointer already wrote is a no-op, whatever the session.
    pub async fn write_checkpoint(&mut self, seq: Seq, session_id: &SessionId) -> Result<WriteResult> {
        if self.is_cancelled() {
            debug!(checkpoint = %self.id, "replication cancelled, checkpoint not written");
            return Ok(WriteResult::Cancelled);
        }
        if !self.options.write_source_checkpoint && !self.options.write_target_checkpoint {
            return Ok(WriteResult::NothingWritten);
        }
        if self.last_written.as_ref() == Some(&seq) {
            debug!(checkpoint = %self.id, %seq, "checkpoint unchanged");
            return Ok(WriteResult::Unchanged);
        }

        let mut last_response = None;
        let mut first_error = None;
        let mut refused = None;

        for endpoint in [Endpoint::Target, Endpoint::Source] {
            if !self.enabled(endpoint) {
                continue;
            }

            match self.update(endpoint, &seq, session_id).await {
                Ok(Some(response)) => last_response = Some(response),
                Ok(None) => {}
                Err(CheckpointError::Endpoint {
                    endpoint: Endpoint::Source,
                    source: StoreError::Forbidden(reason),
                }) => {
                    warn!(
                        checkpoint = %self.id,
                        %reason,
                        "source refuses checkpoint writes, keeping checkpoints on the target only"
                    );
                    self.options.write_source_checkpoint = false;
                    refused = Some(CheckpointError::endpoint(
                        Endpoint::Source,
                        StoreError::Forbidden(reason),
                    ));
                }
                Err(e) => {
                    warn!(checkpoint = %self.id, %endpoint, error = %e, "checkpoint write failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        // the refused source was the only endpoint left, so nothing recorded seq
        if !self.options.write_target_checkpoint {
            if let Some(e) = refused {
                return Err(e);
            }
        }

        self.last_written = Some(seq);
        Ok(last_response.map_or(WriteResult::Unchanged, WriteResult::Written))
    }

    /// Fold `seq` into one endpoint's document and put it
    ///
    /// Returns `None` when the endpoint already records `seq`. Conflicts
    /// re-read the document and re-apply the fold.
    async fn update(
        &mut self,
        endpoint: Endpoint,
        seq: &Seq,
        session_id: &SessionId,
    ) -> Result<Option<PutResponse>> {
        let store = self.store(endpoint);
        let attempts = self.options.max_conflict_retries.saturating_add(1);

        // the cache is dropped until the put succeeds, so any failure forces a re-read
        let cached = self.cache_mut(endpoint).take();
        let mut doc = match cached {
            Some(doc) => doc,
            None => self.fetch_or_new(store.as_ref(), endpoint).await?,
        };

        for attempt in 1..=attempts {
            if doc.is_at(seq) {
                debug!(checkpoint = %self.id, %endpoint, %seq, "endpoint already at checkpoint");
                *self.cache_mut(endpoint) = Some(doc);
                return Ok(None);
            }

            let mut next = doc.clone();
            next.record(session_id, seq.clone());

            match store.put(&next).await {
                Ok(response) => {
                    debug!(
                        checkpoint = %self.id,
                        %endpoint,
                        %seq,
                        session = %session_id,
                        rev = %response.rev,
                        "checkpoint written"
                    );
                    next.rev = Some(response.rev.clone());
                    *self.cache_mut(endpoint) = Some(next);
                    return Ok(Some(response));
                }
                Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => {
                    if attempt == attempts {
                        break;
                    }
                    warn!(
                        checkpoint = %self.id,
                        %endpoint,
                        attempt,
                        "checkpoint revision is stale, re-reading"
                    );
                    doc = self.fetch_or_new(store.as_ref(), endpoint).await?;
                }
                Err(e) => return Err(CheckpointError::endpoint(endpoint, e)),
            }
        }

        Err(CheckpointError::ConflictRetriesExhausted { endpoint, attempts })
    }

    async fn fetch(&self, store: &dyn DocumentStore, endpoint: Endpoint) -> Result<Option<CheckpointDocument>> {
        store
            .get(&self.id)
            .await
            .map_err(|e| CheckpointError::endpoint(endpoint, e))
    }

    async fn fetch_or_new(&self, store: &dyn DocumentStore, endpoint: Endpoint) -> Result<CheckpointDocument> {
        Ok(self
            .fetch(store, endpoint)
            .await?
            .unwrap_or_else(|| CheckpointDocument::new(self.id.clone())))
    }

    /// Cursor to resume replication from
    ///
    /// [`Seq::LOWEST`] when no safe resume point can be established.
    pub async fn get_checkpoint(&mut self) -> Result<Seq> {
        Ok(self.reconcile_checkpoint().await?.seq)
    }

    /// Like [`get_checkpoint`](Self::get_checkpoint), also reporting why the
    /// cursor was chosen
    pub async fn reconcile_checkpoint(&mut self) -> Result<Reconciliation> {
        let read_source = self.options.write_source_checkpoint;
        let read_target = self.options.write_target_checkpoint;

        let result = match (read_source, read_target) {
            (false, false) => Reconciliation::lowest(Basis::Disabled),
            (true, false) => self.single_endpoint(Endpoint::Source).await?,
            (false, true) => self.single_endpoint(Endpoint::Target).await?,
            (true, true) => self.both_endpoints().await?,
        };

        debug!(checkpoint = %self.id, seq = %result.seq, basis = ?result.basis, "resume point");
        Ok(result)
    }

    async fn single_endpoint(&mut self, endpoint: Endpoint) -> Result<Reconciliation> {
        let store = self.store(endpoint);
        let doc = self.fetch(store.as_ref(), endpoint).await?;

        let result = match &doc {
            Some(doc) => Reconciliation {
                seq: doc.current_seq(),
                basis: Basis::SingleEndpoint { endpoint },
            },
            None => Reconciliation::lowest(Basis::NoCheckpoint),
        };
        *self.cache_mut(endpoint) = doc;
        Ok(result)
    }

    async fn both_endpoints(&mut self) -> Result<Reconciliation> {
        let (source_doc, target_doc) = futures::try_join!(
            self.fetch(self.source.as_ref(), Endpoint::Source),
            self.fetch(self.target.as_ref(), Endpoint::Target),
        )?;

        let probe_target_seq = match (&source_doc, &target_doc) {
            (None, Some(target)) if !target.current_seq().is_unset() => Some(target.current_seq()),
            _ => None,
        };

        self.source_doc = source_doc;
        self.target_doc = target_doc;

        match probe_target_seq {
            Some(target_seq) => self.probe_source(target_seq).await,
            None => Ok(reconcile(self.source_doc.as_ref(), self.target_doc.as_ref())),
        }
    }

    /// The target has progress but the source has never been written
    ///
    /// Writing a minimal document tells a read-only source apart from one that
    /// simply lost (or never got) its checkpoint. A read-only source can never
    /// hold a checkpoint, so the target alone decides.
    async fn probe_source(&mut self, target_seq: Seq) -> Result<Reconciliation> {
        let mut probe = CheckpointDocument::probe(self.id.clone());

        match self.source.put(&probe).await {
            Ok(response) => {
                debug!(checkpoint = %self.id, rev = %response.rev, "source checkpoint initialized");
                probe.rev = Some(response.rev);
                self.source_doc = Some(probe);
                Ok(Reconciliation::lowest(Basis::NoCommonSession))
            }
            Err(StoreError::Forbidden(reason)) => {
                warn!(
                    checkpoint = %self.id,
                    %reason,
                    "source is read-only, resuming from the target checkpoint"
                );
                self.options.write_source_checkpoint = false;
                Ok(Reconciliation {
                    seq: target_seq,
                    basis: Basis::ReadOnlySource,
                })
            }
            Err(e) => Err(CheckpointError::endpoint(Endpoint::Source, e)),
        }
    }
}
