//! # replication-checkpoint - Resumable Replication Checkpoints
//!
//! **Checkpoint persistence and resume-point reconciliation** for a
//! replication between two independent document stores, a *source* and a
//! *target*.
//!
//! ## Overview
//!
//! A replication periodically records how far it got. Because the source and
//! the target are separate systems, the record is kept twice, once on each
//! endpoint, and the two copies are written without a shared transaction. A
//! crash between the two writes leaves them disagreeing. This crate:
//!
//! - **Writes checkpoints** to one or both endpoints, target first
//! - **Keeps a rolling session log** of the last five replication sessions
//! - **Reconciles** two diverged logs into the latest cursor both endpoints
//!   have evidence for, falling back to the beginning when there is none
//! - **Retries revision conflicts** by re-reading and re-applying the update
//!
//! ## Core Concepts
//!
//! ### 1. DocumentStore Trait
//!
//! The [`DocumentStore`] trait is the only way the crate touches an endpoint:
//! `get` a checkpoint document, `put` it back with optimistic concurrency.
//! [`InMemoryDocumentStore`] and [`FileDocumentStore`] ship with the crate.
//!
//! ### 2. Checkpoint Documents
//!
//! A [`CheckpointDocument`] stores `last_seq`, `session_id` and the
//! [`History`] of recent sessions under a `_local/` id shared by both
//! endpoints. Its JSON layout is compatible with other replicators reading
//! the same documents.
//!
//! ### 3. Checkpointer
//!
//! [`Checkpointer`] ties it together:
//!
//! - **`write_checkpoint(seq, session)`** - fold and write, target then source
//! - **`get_checkpoint()`** - resume cursor, reconciled across endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replication_checkpoint::{
//!     Checkpointer, CheckpointerOptions, CheckpointId, FileDocumentStore, SessionId,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(FileDocumentStore::open("data/source").await?);
//!     let target = Arc::new(FileDocumentStore::open("data/target").await?);
//!
//!     let mut checkpointer = Checkpointer::new(
//!         source,
//!         target,
//!         CheckpointId::new("1DB6QfM3RDEOFoOwE65CpQ==")?,
//!         serde_json::json!({ "filter": "by_type" }),
//!         CheckpointerOptions::default(),
//!     );
//!
//!     let since = checkpointer.get_checkpoint().await?;
//!     println!("resuming from {}", since);
//!
//!     let session = SessionId::generate();
//!     // ... replicate a batch, then:
//!     checkpointer.write_checkpoint(42.into(), &session).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              Replication driver               │
//! └──────────────────────┬────────────────────────┘
//!                        │ write_checkpoint / get_checkpoint
//!                        ▼
//! ┌───────────────────────────────────────────────┐
//! │                 Checkpointer                  │
//! │  • History fold (history)                     │
//! │  • Reconciliation (reconcile)                 │
//! └───────────┬───────────────────────┬───────────┘
//!             │ 1. target             │ 2. source
//!             ▼                       ▼
//!   ┌──────────────────┐    ┌──────────────────┐
//!   │  DocumentStore   │    │  DocumentStore   │
//!   └──────────────────┘    └──────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`checkpointer`] - [`Checkpointer`], [`WriteResult`]
//! - [`document`] - [`CheckpointDocument`], [`Seq`], [`SessionId`], [`CheckpointId`]
//! - [`history`] - [`History`] and [`HISTORY_SIZE`]
//! - [`reconcile`] - [`reconcile()`](reconcile::reconcile), [`Reconciliation`], [`Basis`]
//! - [`store`] - [`DocumentStore`] trait and [`Endpoint`]
//! - [`memory`] / [`file`] - bundled adapters
//! - [`config`] - [`CheckpointerOptions`]
//! - [`error`] - [`CheckpointError`], [`StoreError`]

pub mod checkpointer;
pub mod config;
pub mod document;
pub mod error;
pub mod file;
pub mod history;
pub mod memory;
pub mod reconcile;
pub mod store;

// Re-export main types
pub use checkpointer::{Checkpointer, WriteResult};
pub use config::CheckpointerOptions;
pub use document::{
    CheckpointDocument, CheckpointId, HistoryEntry, Revision, Seq, SessionId, CHECKPOINT_VERSION,
    LOCAL_PREFIX, REPLICATOR,
};
pub use error::{CheckpointError, Result, StoreError};
pub use file::FileDocumentStore;
pub use history::{History, HISTORY_SIZE};
pub use memory::InMemoryDocumentStore;
pub use reconcile::{reconcile, Basis, Reconciliation};
pub use store::{DocumentStore, Endpoint, PutResponse};
