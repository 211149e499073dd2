//! Version and branch node shapes.
//!
//! Grounded in `examples/original_source/database.py`'s version documents
//! (plain dicts keyed by `"type"` plus per-kind fields). Python's runtime
//! "exactly one kind field is populated" check becomes a Rust enum: the
//! mutual exclusion is structural rather than validated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::container::Value;
use crate::id::Id;
use crate::merge::Rule;

/// The four real version kinds, plus the transient "kindless" open tip
/// modeled separately as [`Version::Open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionKind {
    Root,
    Change,
    Merge,
    Revision,
}

impl std::fmt::Display for VersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VersionKind::Root => "root",
            VersionKind::Change => "change",
            VersionKind::Merge => "merge",
            VersionKind::Revision => "revision",
        };
        write!(f, "{name}")
    }
}

/// Back-edges and bookkeeping fields common to every version, regardless
/// of kind. Kept out of the per-kind payload structs so `common`/`common_mut`
/// accessors on [`Version`] don't need a match arm per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Common {
    /// Wall-clock-ish creation marker; opaque to the core, which never
    /// interprets it, carried only for display/debugging by view layers.
    pub timestamp: Option<String>,
    /// The branch this version was created under, if any (root has none
    /// until the trunk branch is created pointing at it).
    pub branch: Option<Id>,
    /// Branches whose `start` is this version.
    pub branches_out: Vec<Id>,
    /// Merge versions for which this version was the tributary parent.
    pub merged_to: Vec<Id>,
    /// Revision versions whose `original` is this version id — every
    /// revision that has ever targeted this version for replacement, in
    /// creation order. The chain head (the entry whose own `next` is
    /// `None`) is the one currently in effect.
    pub revisions_using: Vec<Id>,
}

/// The root version: the one node with no parent, created once per
/// database and never itself revised or merged away.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Root {
    #[serde(flatten)]
    pub common: Common,
}

/// An incremental commit: a delta container plus the parent it was
/// committed on top of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    #[serde(flatten)]
    pub common: Common,
    pub previous: Id,
    /// Per-record deltas, keyed by record id. Each delta is itself a
    /// `Value::Map` produced by [`crate::container::delta`].
    pub deltas: BTreeMap<Id, Value>,
    /// Records touched by this change that have not yet been reviewed;
    /// must be empty before this version can be the parent of a `commit`.
    pub unchecked: Vec<Id>,
    /// Revision substitutions in effect for this version's own ancestry
    /// walk at the moment it was committed.
    pub revision_changes: BTreeMap<Id, Id>,
}

/// The global fallback rule set for a merge: `all` is consulted when no
/// field- or record-level rule applies at all, and must itself be
/// explicit (`Primary` or `Tributary`); `inherit_priority` breaks a tie
/// between an explicit field-level and an explicit record-level rule
/// when neither carries its own inherit-variant preference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DefaultRules {
    pub all: Rule,
    pub inherit_priority: InheritPriority,
}

impl Default for DefaultRules {
    fn default() -> Self {
        DefaultRules {
            all: Rule::Primary,
            inherit_priority: InheritPriority::Field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InheritPriority {
    #[default]
    Field,
    Record,
}

/// A record-level merge rule plus optional per-field overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordRules {
    pub rule: Option<Rule>,
    pub fields: BTreeMap<String, Rule>,
}

/// A merge of a tributary branch back into its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merge {
    #[serde(flatten)]
    pub common: Common,
    /// The primary parent (the version the tributary branch diverged from
    /// is found via ancestry, not stored directly).
    pub previous: Id,
    pub tributary: Id,
    /// The default merge rule set (`default.all` / `default.inherit_priority`).
    pub default: DefaultRules,
    /// A global, per-field-name rule applied across every record that
    /// doesn't have a more specific rule (the "field_rule" level of the
    /// hierarchy).
    pub field_rules: BTreeMap<String, Rule>,
    /// Per-record rules: a record-wide rule plus optional per-field
    /// overrides (the "record_rule" and "record_field_rule" levels).
    pub records: BTreeMap<Id, RecordRules>,
    pub revision_changes: BTreeMap<Id, Id>,
}

/// A retroactive retargeting: every descendant of `original` is
/// transparently re-ancestored onto `current` during ancestry walks that
/// don't pin an earlier state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    #[serde(flatten)]
    pub common: Common,
    /// The version being revised (the one descendants used to point to).
    pub original: Id,
    /// What `original` is retargeted to.
    pub current: Id,
    /// Doubly-linked revision chain: the revision this one was created
    /// to supersede, and the one that later superseded it, if any.
    pub previous: Option<Id>,
    pub next: Option<Id>,
}

/// A "kindless" open tip: the transient state of a version between its
/// creation (`commit`/`new_branch`/`merge`) and the first `update` call
/// that gives it a kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenTip {
    #[serde(flatten)]
    pub common: Common,
    pub previous: Option<Id>,
    pub deltas: BTreeMap<Id, Value>,
    pub unchecked: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Version {
    Root(Root),
    Change(Change),
    Merge(Merge),
    Revision(Revision),
    Open(OpenTip),
}

impl Version {
    pub fn kind(&self) -> Option<VersionKind> {
        match self {
            Version::Root(_) => Some(VersionKind::Root),
            Version::Change(_) => Some(VersionKind::Change),
            Version::Merge(_) => Some(VersionKind::Merge),
            Version::Revision(_) => Some(VersionKind::Revision),
            Version::Open(_) => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Version::Open(_))
    }

    pub fn common(&self) -> &Common {
        match self {
            Version::Root(r) => &r.common,
            Version::Change(c) => &c.common,
            Version::Merge(m) => &m.common,
            Version::Revision(r) => &r.common,
            Version::Open(o) => &o.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut Common {
        match self {
            Version::Root(r) => &mut r.common,
            Version::Change(c) => &mut c.common,
            Version::Merge(m) => &mut m.common,
            Version::Revision(r) => &mut r.common,
            Version::Open(o) => &mut o.common,
        }
    }

    /// The single forward parent for versions that have exactly one
    /// (everything but root and merge, which has two). Used by the
    /// ancestry walk as the "one edge to definitely follow" shortcut;
    /// merge's second parent (`tributary`) is handled separately.
    pub fn previous(&self) -> Option<&Id> {
        match self {
            Version::Root(_) => None,
            Version::Change(c) => Some(&c.previous),
            Version::Merge(m) => Some(&m.previous),
            Version::Revision(r) => Some(&r.original),
            Version::Open(o) => o.previous.as_ref(),
        }
    }
}

/// A named, mutable pointer into the version DAG: `start` is fixed at
/// creation, `end` advances as new versions are committed on the branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub start: Id,
    pub end: Id,
    pub timestamp: Option<String>,
}

impl Branch {
    pub fn trunk(root: Id) -> Branch {
        Branch {
            start: root.clone(),
            end: root,
            timestamp: None,
        }
    }
}

/// An opaque, schema-free blob a view layer persists through the store.
/// The core never reads or validates its contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewRecord {
    pub data: serde_json::Value,
}
