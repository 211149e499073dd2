//! The ancestry engine: breadth-first back-traversal of the version DAG,
//! transparently splicing revisions out of the walk.
//!
//! Grounded in `examples/original_source/database.py`'s `_trace_back`.
//! Revisions are not nodes a descendant's `previous`/`tributary` pointer
//! can ever name directly — instead, a version that has been revised
//! carries the revising [`crate::version::Revision`] ids in its
//! `revisions_using` back-edge, and `trace_back` consults that edge every
//! time it is about to step onto a version, deciding whether to keep
//! going to that version or jump to the revision's replacement instead.
//!
//! The decision policy is fixed once per walk, from the *start* node:
//! an open (live, uncommitted) start always takes a revision's `current`
//! (the freshest available replacement); a closed start takes `original`
//! (the frozen, as-committed view) unless the start's own stored
//! `revision_changes` map records a different choice it made at commit
//! time. Once a given revision id has been resolved anywhere in a walk,
//! every later encounter of the same id reuses that choice
//! (first-pin-wins) — required because converging paths through a merge
//! could otherwise resolve the same revision two different ways in one
//! traversal.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::error::{Error, Result};
use crate::graph::VersionGraphStore;
use crate::id::Id;
use crate::version::Version;

/// The result of a single back-traversal from a start version.
#[derive(Debug, Clone, Default)]
pub struct TraceBack {
    /// Every version reached, in BFS (shallowest-first) order, including
    /// the start itself.
    pub ancestors: Vec<Id>,
    /// BFS distance from the start, keyed by version id.
    pub distances: AHashMap<Id, u32>,
    /// The revision resolution taken for each revision id encountered
    /// during this walk (revision id -> the version it resolved to).
    pub revision_state: AHashMap<Id, Id>,
    /// The reduced parent graph: version id -> direct ancestors, with
    /// every revision transparently resolved away (an edge never names a
    /// revision id).
    pub graph: AHashMap<Id, Vec<Id>>,
}

impl TraceBack {
    pub fn contains(&self, id: &Id) -> bool {
        self.distances.contains_key(id)
    }
}

fn own_revision_changes(store: &VersionGraphStore, id: &Id) -> Result<AHashMap<Id, Id>> {
    Ok(match store.get_version(id)? {
        Version::Change(c) => c.revision_changes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Version::Merge(m) => m.revision_changes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => AHashMap::new(),
    })
}

/// The currently-active revision targeting `id` as its `original`, if any
/// (the chain head: the one whose own `next` is `None`).
fn active_revision_for(store: &VersionGraphStore, id: &Id) -> Result<Option<Id>> {
    let common = store.get_version(id)?.common();
    for candidate in &common.revisions_using {
        if let Version::Revision(r) = store.get_version(candidate)? {
            if r.next.is_none() {
                return Ok(Some(candidate.clone()));
            }
        }
    }
    Ok(None)
}

/// Resolves `id` through zero or more revisions until it reaches a
/// version with no active revision targeting it.
fn resolve_through_revisions(
    store: &VersionGraphStore,
    mut id: Id,
    is_open_start: bool,
    own_pins: &AHashMap<Id, Id>,
    revision_state: &mut AHashMap<Id, Id>,
) -> Result<Id> {
    loop {
        let Some(rev_id) = active_revision_for(store, &id)? else {
            return Ok(id);
        };
        let Version::Revision(rev) = store.get_version(&rev_id)? else {
            unreachable!("active_revision_for only returns revision ids")
        };

        let target = if let Some(already) = revision_state.get(&rev_id) {
            already.clone()
        } else {
            // `current` (and a stored pin) may name a branch id rather
            // than a version id directly, tracking that branch's tip
            // dynamically; `to_version_id` is a no-op for a version id.
            let raw = if is_open_start {
                rev.current.clone()
            } else if let Some(pinned) = own_pins.get(&rev_id) {
                pinned.clone()
            } else {
                rev.original.clone()
            };
            let chosen = store.to_version_id(&raw, true)?;
            revision_state.insert(rev_id.clone(), chosen.clone());
            chosen
        };

        if target == id {
            // Pinned to its own original: nothing to splice, stop here.
            return Ok(id);
        }
        id = target;
    }
}

/// Traces a version's ancestry back to the root, splicing out revisions.
pub fn trace_back(store: &VersionGraphStore, start: &Id) -> Result<TraceBack> {
    trace_back_policy(store, start, None)
}

/// Like [`trace_back`], but forces the live (open-start) revision
/// selection policy regardless of `start`'s actual stored kind. Used when
/// a not-yet-decided closed node (a merge being assembled) needs to see
/// the same "freshest available replacement" view an open tip would, so
/// its live selection can be compared against its parents' already-pinned
/// ones.
pub fn trace_back_live(store: &VersionGraphStore, start: &Id) -> Result<TraceBack> {
    trace_back_policy(store, start, Some(true))
}

fn trace_back_policy(store: &VersionGraphStore, start: &Id, force_open: Option<bool>) -> Result<TraceBack> {
    let is_open = match force_open {
        Some(forced) => forced,
        None => store.is_open(start)?,
    };
    let own_pins = own_revision_changes(store, start)?;

    let mut out = TraceBack::default();
    let mut queue: VecDeque<Id> = VecDeque::new();
    let mut seen: AHashSet<Id> = AHashSet::new();

    queue.push_back(start.clone());
    seen.insert(start.clone());
    out.distances.insert(start.clone(), 0);

    while let Some(current) = queue.pop_front() {
        let dist = out.distances[&current];
        out.ancestors.push(current.clone());

        let version = store.get_version(&current)?;
        let raw_parents: Vec<Id> = match version {
            Version::Root(_) => Vec::new(),
            Version::Change(c) => vec![c.previous.clone()],
            Version::Open(o) => o.previous.iter().cloned().collect(),
            Version::Merge(m) => vec![m.previous.clone(), m.tributary.clone()],
            Version::Revision(r) => vec![r.original.clone()],
        };

        let mut parents = Vec::with_capacity(raw_parents.len());
        for raw in raw_parents {
            let resolved =
                resolve_through_revisions(store, raw, is_open, &own_pins, &mut out.revision_state)?;
            parents.push(resolved.clone());
            if seen.insert(resolved.clone()) {
                out.distances.insert(resolved.clone(), dist + 1);
                queue.push_back(resolved);
            }
        }
        out.graph.insert(current, parents);
    }

    Ok(out)
}

pub fn ancestors(store: &VersionGraphStore, id: &Id) -> Result<Vec<Id>> {
    Ok(trace_back(store, id)?.ancestors)
}

pub fn revision_state(store: &VersionGraphStore, id: &Id) -> Result<AHashMap<Id, Id>> {
    Ok(trace_back(store, id)?.revision_state)
}

/// The revision selection `id` would see under the live (open-start)
/// policy, regardless of `id`'s actual stored kind. See [`trace_back_live`].
pub fn revision_state_live(store: &VersionGraphStore, id: &Id) -> Result<AHashMap<Id, Id>> {
    Ok(trace_back_live(store, id)?.revision_state)
}

pub fn graph(store: &VersionGraphStore, id: &Id) -> Result<AHashMap<Id, Vec<Id>>> {
    Ok(trace_back(store, id)?.graph)
}

/// Finds the lowest common ancestor of `a` and `b`: the first element of
/// `ancestry(a)` (BFS/visitation order) that also appears in `ancestry(b)`.
/// Errors with [`Error::NoLca`] if the two share no ancestor at all
/// (shouldn't happen in a single-rooted DAG, but a cross-database
/// `find_lca` call could hit it).
pub fn find_lca(store: &VersionGraphStore, a: &Id, b: &Id) -> Result<Id> {
    let ta = trace_back(store, a)?;
    let tb = trace_back(store, b)?;

    ta.ancestors
        .iter()
        .find(|id| tb.contains(id))
        .cloned()
        .ok_or_else(|| Error::NoLca { a: a.clone(), b: b.clone() })
}

/// Whether `ancestor` is `descendant` or one of its ancestors.
pub fn is_ancestor(store: &VersionGraphStore, ancestor: &Id, descendant: &Id) -> Result<bool> {
    Ok(trace_back(store, descendant)?.contains(ancestor))
}
