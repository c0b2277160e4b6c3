//! Resume-point reconciliation of two diverged checkpoint documents
//!
//! The source and target copies of a checkpoint are written without a shared
//! transaction, so after a crash they may disagree. Reconciliation compares
//! their session logs and picks the latest cursor both sides have evidence
//! for.
//!
//! Two invariants belong together here:
//!
//! - [`Checkpointer::write_checkpoint`](crate::Checkpointer::write_checkpoint)
//!   always writes the target before the source, so the target is never
//!   behind the source for a session they share.
//! - When the matching session carries different cursors on the two sides,
//!   the source cursor wins. It trails (or equals) the target's and is the
//!   only value known to be recorded on both endpoints.
//!
//! Changing the write order without changing the tie-break (or the reverse)
//! makes resumption skip unreplicated changes.

use crate::document::{CheckpointDocument, Seq, SessionId, CHECKPOINT_VERSION};
use crate::store::Endpoint;
use std::fmt;

/// Why reconciliation settled on its cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Basis {
    /// Neither endpoint keeps checkpoints
    Disabled,
    /// Only `endpoint` keeps checkpoints; its cursor is taken as is
    SingleEndpoint { endpoint: Endpoint },
    /// The source refused a probe write; the target's cursor is taken as is
    ReadOnlySource,
    /// Neither endpoint has a checkpoint
    NoCheckpoint,
    /// Both sides recorded the same cursor for `session_id`
    Agreed { session_id: SessionId },
    /// The source's current session is on the target with a newer cursor
    SourceTrailing {
        session_id: SessionId,
        target_seq: Seq,
    },
    /// The two logs share no session (or one side is absent)
    NoCommonSession,
    /// The two documents carry different schema versions
    VersionMismatch {
        source: Option<u32>,
        target: Option<u32>,
    },
    /// Both documents predate session logs; cursors compared directly
    Legacy { matched: bool },
    /// Schema version this crate does not know how to compare
    UnsupportedVersion(u32),
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::Disabled => write!(f, "checkpoints disabled"),
            Basis::SingleEndpoint { endpoint } => write!(f, "{} checkpoint only", endpoint),
            Basis::ReadOnlySource => write!(f, "source is read-only, using target"),
            Basis::NoCheckpoint => write!(f, "no checkpoint"),
            Basis::Agreed { session_id } => write!(f, "agreed on session {}", session_id),
            Basis::SourceTrailing {
                session_id,
                target_seq,
            } => write!(
                f,
                "session {} trails target at {}",
                session_id, target_seq
            ),
            Basis::NoCommonSession => write!(f, "no common session"),
            Basis::VersionMismatch { source, target } => write!(
                f,
                "version mismatch (source {:?}, target {:?})",
                source, target
            ),
            Basis::Legacy { matched: true } => write!(f, "legacy checkpoints match"),
            Basis::Legacy { matched: false } => write!(f, "legacy checkpoints differ"),
            Basis::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
        }
    }
}

/// Outcome of reconciling the two endpoints' checkpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub seq: Seq,
    pub basis: Basis,
}

impl Reconciliation {
    pub(crate) fn lowest(basis: Basis) -> Self {
        Self {
            seq: Seq::LOWEST,
            basis,
        }
    }

    /// Whether resumption has to start from the beginning
    pub fn is_lowest(&self) -> bool {
        self.seq == Seq::LOWEST
    }
}

/// A `(session, cursor)` pair in scan order: current state first, then history
struct Candidate<'a> {
    session_id: &'a SessionId,
    last_seq: Seq,
    current: bool,
}

fn candidates(doc: Option<&CheckpointDocument>) -> Vec<Candidate<'_>> {
    let Some(doc) = doc else {
        return Vec::new();
    };

    let mut list = Vec::with_capacity(doc.history.len() + 1);
    if let Some(session_id) = &doc.session_id {
        list.push(Candidate {
            session_id,
            last_seq: doc.current_seq(),
            current: true,
        });
    }
    list.extend(doc.history.iter().map(|entry| Candidate {
        session_id: &entry.session_id,
        last_seq: entry.last_seq.clone(),
        current: false,
    }));
    list
}

/// Compare the two session logs
///
/// Scans the source candidates most-recent-first and stops at the first
/// session the target also knows. The answer is always the source's cursor
/// for that session.
pub fn compare_histories(
    source: Option<&CheckpointDocument>,
    target: Option<&CheckpointDocument>,
) -> Reconciliation {
    let source_list = candidates(source);
    let target_list = candidates(target);

    for candidate in &source_list {
        let Some(matched) = target_list
            .iter()
            .find(|t| t.session_id == candidate.session_id)
        else {
            continue;
        };

        let basis = if candidate.current && matched.last_seq != candidate.last_seq {
            Basis::SourceTrailing {
                session_id: candidate.session_id.clone(),
                target_seq: matched.last_seq.clone(),
            }
        } else {
            Basis::Agreed {
                session_id: candidate.session_id.clone(),
            }
        };

        return Reconciliation {
            seq: candidate.last_seq.clone(),
            basis,
        };
    }

    Reconciliation::lowest(Basis::NoCommonSession)
}

/// Work out the resume cursor from both endpoints' documents
///
/// `None` stands for an endpoint without a checkpoint document. The result is
/// [`Seq::LOWEST`] whenever the two documents give no evidence of a shared
/// session.
pub fn reconcile(
    source: Option<&CheckpointDocument>,
    target: Option<&CheckpointDocument>,
) -> Reconciliation {
    let (source_doc, target_doc) = match (source, target) {
        (None, None) => return Reconciliation::lowest(Basis::NoCheckpoint),
        (Some(s), Some(t)) => (s, t),
        _ => return compare_histories(source, target),
    };

    if source_doc.version != target_doc.version {
        return Reconciliation::lowest(Basis::VersionMismatch {
            source: source_doc.version,
            target: target_doc.version,
        });
    }

    match source_doc.version {
        None => {
            let matched = source_doc.last_seq == target_doc.last_seq;
            Reconciliation {
                seq: if matched {
                    source_doc.current_seq()
                } else {
                    Seq::LOWEST
                },
                basis: Basis::Legacy { matched },
            }
        }
        Some(CHECKPOINT_VERSION) => compare_histories(source, target),
        Some(other) => Reconciliation::lowest(Basis::UnsupportedVersion(other)),
    }
}
