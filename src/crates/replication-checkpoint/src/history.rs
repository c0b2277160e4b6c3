//! Rolling log of recent replication sessions
//!
//! The history is deep enough to find a session both endpoints have seen even
//! when each side resumed several times on its own since they last agreed.

use crate::document::{HistoryEntry, Seq, SessionId};
use serde::{Deserialize, Serialize};

/// Maximum number of sessions kept in a checkpoint's history
pub const HISTORY_SIZE: usize = 5;

/// Most-recent-first list of `{session_id, last_seq}` entries
///
/// Holds at most [`HISTORY_SIZE`] entries with unique session ids once it has
/// been through [`History::record`]. Deserialization keeps whatever the store
/// returned so reconciliation sees the other endpoint's data as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(Vec<HistoryEntry>);

impl History {
    pub fn new() -> Self {
        Self(Vec::with_capacity(HISTORY_SIZE))
    }

    /// Build a history from arbitrary entries, normalizing it
    ///
    /// Later duplicates of a session are dropped and the list is capped.
    pub fn from_entries(entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let mut history = Self::new();
        for entry in entries {
            if !history.contains(&entry.session_id) {
                history.0.push(entry);
            }
        }
        history.0.truncate(HISTORY_SIZE);
        history
    }

    /// Fold a session's new progress into the log
    pub fn record(&mut self, session_id: SessionId, last_seq: Seq) {
        self.0.retain(|entry| entry.session_id != session_id);
        self.0.insert(0, HistoryEntry::new(session_id, last_seq));
        self.0.truncate(HISTORY_SIZE);
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.0.first()
    }

    /// Entry recorded for `session_id`, if any
    pub fn find(&self, session_id: &SessionId) -> Option<&HistoryEntry> {
        self.0.iter().find(|entry| &entry.session_id == session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.find(session_id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[HistoryEntry] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
