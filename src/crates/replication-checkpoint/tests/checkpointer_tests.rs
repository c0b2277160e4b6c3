//! Integration tests for the checkpointer
//!
//! These tests drive a [`Checkpointer`] against two in-memory endpoints and
//! verify:
//! - Checkpoint documents written to both endpoints
//! - History folding (replace per session, five entries max)
//! - Source-only / target-only / disabled targeting
//! - Resume points reconciled from diverged endpoint states

use replication_checkpoint::{
    CheckpointDocument, CheckpointId, Checkpointer, CheckpointerOptions, DocumentStore,
    InMemoryDocumentStore, Seq, SessionId, WriteResult,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

struct Endpoints {
    source: InMemoryDocumentStore,
    target: InMemoryDocumentStore,
}

impl Endpoints {
    fn new() -> Self {
        Self {
            source: InMemoryDocumentStore::new("local_test_db"),
            target: InMemoryDocumentStore::new("target_test_db"),
        }
    }

    /// Checkpointer with a fresh replication id
    fn checkpointer(&self, options: CheckpointerOptions) -> Checkpointer {
        let replication_id = format!("replication-{}", NEXT_ID.fetch_add(1, Ordering::SeqCst));
        Checkpointer::new(
            Arc::new(self.source.clone()),
            Arc::new(self.target.clone()),
            CheckpointId::new(replication_id).unwrap(),
            json!({}),
            options,
        )
    }

    async fn docs(&self, id: &CheckpointId) -> (Option<CheckpointDocument>, Option<CheckpointDocument>) {
        let (source, target) = futures::join!(self.source.get(id), self.target.get(id));
        (source.unwrap(), target.unwrap())
    }

    async fn seed(&self, store: &InMemoryDocumentStore, id: &CheckpointId, value: serde_json::Value) {
        let mut doc: CheckpointDocument = serde_json::from_value(value).unwrap();
        doc.id = id.clone();
        store.put(&doc).await.unwrap();
    }
}

fn session(name: &str) -> SessionId {
    SessionId::from(name)
}

fn source_only() -> CheckpointerOptions {
    CheckpointerOptions::default().with_write_target_checkpoint(false)
}

fn target_only() -> CheckpointerOptions {
    CheckpointerOptions::default().with_write_source_checkpoint(false)
}

#[tokio::test]
async fn test_create_checkpointer() {
    let endpoints = Endpoints::new();
    let checkpointer = endpoints.checkpointer(CheckpointerOptions::default());

    assert_eq!(checkpointer.source().name(), "local_test_db");
    assert_eq!(checkpointer.target().name(), "target_test_db");
    assert!(checkpointer.options().write_source_checkpoint);
    assert!(checkpointer.options().write_target_checkpoint);
    assert!(checkpointer.id().as_str().starts_with("_local/"));
}

#[tokio::test]
async fn test_write_to_both_endpoints() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());

    let result = checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();
    let response = result.response().unwrap();
    assert!(response.ok);
    assert_eq!(response.rev.as_str(), "0-1");
    assert_eq!(&response.id, checkpointer.id());

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    let (source, target) = (source.unwrap(), target.unwrap());
    assert_eq!(source.rev.as_ref().unwrap().as_str(), "0-1");
    assert_eq!(target.rev.as_ref().unwrap().as_str(), "0-1");
    assert_eq!(&source.id, checkpointer.id());
    assert_eq!(&target.id, checkpointer.id());
    assert_eq!(source.history.len(), 1);
    assert_eq!(source.last_seq.as_ref(), Some(&source.history.latest().unwrap().last_seq));
}

#[tokio::test]
async fn test_stored_layout() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let raw = endpoints.target.get_raw(checkpointer.id()).await.unwrap();
    assert_eq!(
        raw,
        json!({
            "_id": checkpointer.id().as_str(),
            "_rev": "0-1",
            "session_id": "session-1",
            "last_seq": 1,
            "history": [{ "session_id": "session-1", "last_seq": 1 }],
            "replicator": "pouchdb",
            "version": 1
        })
    );
}

#[tokio::test]
async fn test_update_with_next_session() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let update = checkpointer.write_checkpoint(Seq::from(2), &session("session-2")).await.unwrap();
    let response = update.response().unwrap();
    assert!(response.ok);
    assert_eq!(response.rev.as_str(), "0-2");

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    let (source, target) = (source.unwrap(), target.unwrap());
    assert_eq!(source.last_seq, Some(Seq::from(2)));
    assert_eq!(target.last_seq, Some(Seq::from(2)));
    assert_eq!(source.history.len(), 2);
    assert_eq!(source.history.latest().unwrap().session_id, session("session-2"));
}

#[tokio::test]
async fn test_unchanged_checkpoint_is_not_written() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let result = checkpointer.write_checkpoint(Seq::from(1), &session("session-2")).await.unwrap();
    assert_eq!(result, WriteResult::Unchanged);
    assert_eq!(endpoints.source.put_count(), 1);
    assert_eq!(endpoints.target.put_count(), 1);

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    for doc in [source.unwrap(), target.unwrap()] {
        assert_eq!(doc.last_seq, Some(Seq::from(1)));
        assert_eq!(doc.history.len(), 1);
        assert_eq!(doc.history.latest().unwrap().session_id, session("session-1"));
    }
}

#[tokio::test]
async fn test_one_history_entry_per_session() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let update = checkpointer.write_checkpoint(Seq::from(2), &session("session-1")).await.unwrap();
    assert_eq!(update.response().unwrap().rev.as_str(), "0-2");

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    for doc in [source.unwrap(), target.unwrap()] {
        assert_eq!(doc.history.len(), 1);
        assert_eq!(doc.last_seq, Some(Seq::from(2)));
        assert_eq!(doc.session_id, Some(session("session-1")));
    }
}

#[tokio::test]
async fn test_history_keeps_five_latest_sessions() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());

    for i in 1..8u64 {
        checkpointer
            .write_checkpoint(Seq::from(i), &SessionId::new(format!("session-{}", i)))
            .await
            .unwrap();
    }

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    for doc in [source.unwrap(), target.unwrap()] {
        assert_eq!(doc.history.len(), 5);
        assert_eq!(doc.rev.as_ref().unwrap().as_str(), "0-7");
        assert_eq!(doc.last_seq, Some(Seq::from(7)));
        assert_eq!(
            doc.history.as_slice().last().unwrap().session_id,
            session("session-3")
        );
    }
}

#[tokio::test]
async fn test_write_source_only() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(source_only());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    assert_eq!(source.unwrap().last_seq, Some(Seq::from(1)));
    assert!(target.is_none());
}

#[tokio::test]
async fn test_write_target_only() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(target_only());
    checkpointer.write_checkpoint(Seq::from(1), &session("session-1")).await.unwrap();

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    assert_eq!(target.unwrap().last_seq, Some(Seq::from(1)));
    assert!(source.is_none());
}

#[tokio::test]
async fn test_get_without_checkpoint() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::LOWEST);
}

#[tokio::test]
async fn test_get_with_both_endpoints_disabled() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(
        CheckpointerOptions::default()
            .with_write_source_checkpoint(false)
            .with_write_target_checkpoint(false),
    );

    let result = checkpointer.write_checkpoint(Seq::from(5), &session("session-5")).await.unwrap();
    assert_eq!(result, WriteResult::NothingWritten);
    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::LOWEST);
    assert_eq!(endpoints.source.put_count() + endpoints.target.put_count(), 0);
}

#[tokio::test]
async fn test_get_from_source_only() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(source_only());
    checkpointer.write_checkpoint(Seq::from(4), &session("session-5")).await.unwrap();

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(4));
}

#[tokio::test]
async fn test_get_from_source_only_without_document() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(source_only());

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::LOWEST);
}

#[tokio::test]
async fn test_get_from_target_only() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(target_only());
    checkpointer.write_checkpoint(Seq::from(8), &session("session-8")).await.unwrap();

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(8));
}

#[tokio::test]
async fn test_get_diverged_source_ahead() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    let id = checkpointer.id().clone();

    endpoints
        .seed(
            &endpoints.source,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-3",
                "history": [
                    { "session_id": "session-3", "last_seq": 3 },
                    { "session_id": "session-2", "last_seq": 2 },
                    { "session_id": "session-1", "last_seq": 1 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 3
            }),
        )
        .await;
    endpoints
        .seed(
            &endpoints.target,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-2",
                "history": [
                    { "session_id": "session-2", "last_seq": 2 },
                    { "session_id": "session-1", "last_seq": 1 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 2
            }),
        )
        .await;

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(2));
}

#[tokio::test]
async fn test_get_diverged_target_ahead() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    let id = checkpointer.id().clone();

    endpoints
        .seed(
            &endpoints.source,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-6",
                "history": [
                    { "session_id": "session-6", "last_seq": 6 },
                    { "session_id": "session-5", "last_seq": 5 },
                    { "session_id": "session-4", "last_seq": 4 },
                    { "session_id": "session-3", "last_seq": 3 },
                    { "session_id": "session-2", "last_seq": 2 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 6
            }),
        )
        .await;
    endpoints
        .seed(
            &endpoints.target,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-9",
                "history": [
                    { "session_id": "session-9", "last_seq": 9 },
                    { "session_id": "session-8", "last_seq": 8 },
                    { "session_id": "session-7", "last_seq": 7 },
                    { "session_id": "session-6", "last_seq": 6 },
                    { "session_id": "session-5", "last_seq": 5 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 9
            }),
        )
        .await;

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(6));
}

// the target is written first, so for a shared session it is never behind
#[tokio::test]
async fn test_get_same_session_different_seq_takes_source() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    let id = checkpointer.id().clone();

    endpoints
        .seed(
            &endpoints.source,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-3",
                "history": [
                    { "session_id": "session-3", "last_seq": 6 },
                    { "session_id": "session-2", "last_seq": 5 },
                    { "session_id": "session-1", "last_seq": 2 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 6
            }),
        )
        .await;
    endpoints
        .seed(
            &endpoints.target,
            &id,
            json!({
                "_id": "seed",
                "session_id": "session-3",
                "history": [
                    { "session_id": "session-3", "last_seq": 7 },
                    { "session_id": "session-2", "last_seq": 5 },
                    { "session_id": "session-1", "last_seq": 2 }
                ],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": 7
            }),
        )
        .await;

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(6));
}

#[tokio::test]
async fn test_get_without_common_session() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    let id = checkpointer.id().clone();

    endpoints
        .seed(
            &endpoints.source,
            &id,
            json!({
                "_id": "seed",
                "session_id": "a",
                "history": [{ "session_id": "a", "last_seq": "4-xyz" }],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": "4-xyz"
            }),
        )
        .await;
    endpoints
        .seed(
            &endpoints.target,
            &id,
            json!({
                "_id": "seed",
                "session_id": "b",
                "history": [{ "session_id": "b", "last_seq": "9-abc" }],
                "replicator": "pouchdb",
                "version": 1,
                "last_seq": "9-abc"
            }),
        )
        .await;

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::LOWEST);
}

#[tokio::test]
async fn test_interrupted_dual_write_resumes_from_source() {
    let endpoints = Endpoints::new();
    let mut checkpointer = endpoints.checkpointer(CheckpointerOptions::default());
    let run = session("run-1");

    checkpointer.write_checkpoint(Seq::from(10), &run).await.unwrap();

    // the source write of the next checkpoint is lost
    endpoints
        .source
        .fail_next_put(replication_checkpoint::StoreError::Unavailable("crash".to_string()));
    assert!(checkpointer.write_checkpoint(Seq::from(20), &run).await.is_err());

    let (source, target) = endpoints.docs(checkpointer.id()).await;
    assert_eq!(source.unwrap().last_seq, Some(Seq::from(10)));
    assert_eq!(target.unwrap().last_seq, Some(Seq::from(20)));

    assert_eq!(checkpointer.get_checkpoint().await.unwrap(), Seq::from(10));
}
