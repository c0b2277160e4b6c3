//! Checkpoint document model shared by both replication endpoints
//!
//! Each endpoint stores its own copy of one [`CheckpointDocument`] under the
//! same [`CheckpointId`]. The JSON layout is fixed so that any other replicator
//! reading the same documents understands them:
//!
//! ```json
//! {
//!   "_id": "_local/1DB6QfM3RDEOFoOwE65CpQ==",
//!   "_rev": "0-3",
//!   "session_id": "session-3",
//!   "last_seq": 3,
//!   "history": [
//!     { "session_id": "session-3", "last_seq": 3 },
//!     { "session_id": "session-2", "last_seq": 2 }
//!   ],
//!   "replicator": "pouchdb",
//!   "version": 1
//! }
//! ```
//!
//! `last_seq` and `session_id` always mirror the first `history` entry once a
//! document has been written through [`CheckpointDocument::record`].

use crate::error::{CheckpointError, Result};
use crate::history::History;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking a document as endpoint-local (never replicated)
pub const LOCAL_PREFIX: &str = "_local/";

/// Value of the `replicator` field written on every checkpoint
pub const REPLICATOR: &str = "pouchdb";

/// Schema version written on every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

/// Opaque progress cursor of a replication
///
/// Sequences are either plain integers or opaque tokens (clustered stores hand
/// out strings such as `"12-g1AAAA"`). They are only ever compared for
/// equality by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seq {
    Number(u64),
    Token(String),
}

impl Seq {
    /// Beginning of the sequence: "replicate everything"
    pub const LOWEST: Seq = Seq::Number(0);

    /// `0` and the empty token carry no progress
    pub fn is_unset(&self) -> bool {
        match self {
            Seq::Number(n) => *n == 0,
            Seq::Token(t) => t.is_empty(),
        }
    }

    /// Resolve an optional stored cursor, treating unset values as [`Seq::LOWEST`]
    pub fn or_lowest(seq: Option<&Seq>) -> Seq {
        match seq {
            Some(seq) if !seq.is_unset() => seq.clone(),
            _ => Seq::LOWEST,
        }
    }
}

impl Default for Seq {
    fn default() -> Self {
        Seq::LOWEST
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seq::Number(n) => write!(f, "{}", n),
            Seq::Token(t) => f.write_str(t),
        }
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq::Number(n)
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq::Token(s.to_string())
    }
}

impl From<String> for Seq {
    fn from(s: String) -> Self {
        Seq::Token(s)
    }
}

impl std::str::FromStr for Seq {
    type Err = std::convert::Infallible;

    /// Integers parse as [`Seq::Number`], anything else is kept as a token
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<u64>().map(Seq::Number).unwrap_or_else(|_| Seq::Token(s.to_string())))
    }
}

/// Identifier of one replication run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random session id for a new replication run
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Store-assigned revision token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Next revision in the `0-N` scheme used for endpoint-local documents
    pub fn next_local(previous: Option<&Revision>) -> Self {
        let generation = previous
            .and_then(|rev| rev.0.strip_prefix("0-"))
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0);
        Self(format!("0-{}", generation + 1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id shared by the source and target copies of a checkpoint
///
/// The id is derived elsewhere from the replication's identity; this type
/// only guarantees the [`LOCAL_PREFIX`] is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Wrap a replication id, adding the `_local/` prefix when missing
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let key = id.strip_prefix(LOCAL_PREFIX).unwrap_or(&id);
        if key.trim().is_empty() {
            return Err(CheckpointError::InvalidId(format!(
                "replication id is empty: {:?}",
                id
            )));
        }
        if id.starts_with(LOCAL_PREFIX) {
            Ok(Self(id))
        } else {
            Ok(Self(format!("{}{}", LOCAL_PREFIX, id)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id without the `_local/` prefix
    pub fn key(&self) -> &str {
        self.0.strip_prefix(LOCAL_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `{session_id, last_seq}` pair of the rolling history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    pub last_seq: Seq,
}

impl HistoryEntry {
    pub fn new(session_id: SessionId, last_seq: Seq) -> Self {
        Self {
            session_id,
            last_seq,
        }
    }
}

/// Persisted checkpoint record of one endpoint
///
/// `session_id`, `last_seq`, `replicator` and `version` are optional so that
/// legacy documents and source probes (`{_id, last_seq: 0}`) still load.
/// Fields this crate does not know are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    #[serde(rename = "_id")]
    pub id: CheckpointId,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<Seq>,

    #[serde(default, skip_serializing_if = "History::is_empty")]
    pub history: History,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CheckpointDocument {
    /// Empty record used when an endpoint has no checkpoint yet
    pub fn new(id: CheckpointId) -> Self {
        Self {
            id,
            rev: None,
            session_id: None,
            last_seq: None,
            history: History::new(),
            replicator: Some(REPLICATOR.to_string()),
            version: Some(CHECKPOINT_VERSION),
            extra: serde_json::Map::new(),
        }
    }

    /// Minimal `{_id, last_seq: 0}` record used to probe whether an endpoint accepts writes
    pub fn probe(id: CheckpointId) -> Self {
        Self {
            id,
            rev: None,
            session_id: None,
            last_seq: Some(Seq::LOWEST),
            history: History::new(),
            replicator: None,
            version: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Stored cursor, [`Seq::LOWEST`] when unset
    pub fn current_seq(&self) -> Seq {
        Seq::or_lowest(self.last_seq.as_ref())
    }

    /// Whether the document already records `seq` as its progress
    pub fn is_at(&self, seq: &Seq) -> bool {
        self.last_seq.as_ref() == Some(seq)
    }

    /// Fold a new progress record into the document
    ///
    /// The session's previous history entry (if any) is replaced, the new
    /// entry goes to the front and the history is capped. The top-level
    /// fields are rewritten to mirror the new head.
    pub fn record(&mut self, session_id: &SessionId, seq: Seq) {
        self.history.record(session_id.clone(), seq.clone());
        self.session_id = Some(session_id.clone());
        self.last_seq = Some(seq);
        self.replicator = Some(REPLICATOR.to_string());
        self.version = Some(CHECKPOINT_VERSION);
    }
}
