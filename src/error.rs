//! The single error family for the whole crate.

use thiserror::Error;

use crate::id::Id;
use crate::version::VersionKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a `verdb` operation can fail.
///
/// There is deliberately one flat enum rather than a tree of per-module
/// errors: every operation in the core can fail in only these ten ways,
/// and callers (views, CLI) are expected to match on the kind directly
/// rather than unwrap a chain of `source()`s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no {kind} with id {id}")]
    NotFound { kind: &'static str, id: Id },

    #[error("wrong kind for {id}: expected {expected}, found {found}")]
    WrongKind {
        id: Id,
        expected: &'static str,
        found: VersionKindOrNone,
    },

    #[error("{id} must be open for this operation")]
    OpenRequired { id: Id },

    #[error("{id} must be closed for this operation")]
    ClosedRequired { id: Id },

    #[error("{id} has pending (unchecked) edits and cannot be committed")]
    PendingReview { id: Id },

    #[error("revising {revision} to {target} would create a cycle")]
    WouldCreateCycle { revision: Id, target: Id },

    #[error("document for {id} declares more than one version kind")]
    MultipleKinds { id: Id },

    #[error("{0:?} is not a valid id")]
    InvalidId(String),

    #[error("type error at {path}: {message}")]
    TypeError { path: String, message: String },

    #[error("no lowest common ancestor found for {a} and {b}")]
    NoLca { a: Id, b: Id },

    /// Ambient I/O failure from the persistence layer — not one of the
    /// core graph-semantics kinds above, but unavoidable once the store
    /// is backed by a directory of files.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Helper for `WrongKind`'s `found` field: a version either has a concrete
/// kind, or is the "kindless" open tip that hasn't been committed yet.
#[derive(Debug, Clone, Copy)]
pub enum VersionKindOrNone {
    Kind(VersionKind),
    None,
}

impl std::fmt::Display for VersionKindOrNone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionKindOrNone::Kind(k) => write!(f, "{k}"),
            VersionKindOrNone::None => write!(f, "none"),
        }
    }
}

impl From<Option<VersionKind>> for VersionKindOrNone {
    fn from(k: Option<VersionKind>) -> Self {
        match k {
            Some(k) => VersionKindOrNone::Kind(k),
            None => VersionKindOrNone::None,
        }
    }
}
