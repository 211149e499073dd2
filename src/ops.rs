//! Graph-mutating operations: the seven ways the version DAG changes.
//!
//! Grounded in `examples/original_source/database.py`'s `setup`/`update`/
//! `commit`/`new_branch`/`merge`/`setup_revision`/`revise`, adapted to
//! this crate's architecture where a revision is pure metadata layered
//! onto the version it targets (via `revisions_using`) rather than an
//! extra node other edges can point at — which is also why the back-edge
//! reparenting bug in the Python draft's `setup_revision` doesn't arise
//! here: nothing ever points *at* a revision id as a graph edge, so there
//! is nothing to move when one is created.
//!
//! Every operation here returns the set of version ids it touched, for
//! the caller (`Database`, in `lib.rs`) to persist and notify observers
//! about, in that order.

use std::collections::BTreeMap;

use crate::ancestry::is_ancestor;
use crate::container::Value;
use crate::error::{Error, Result, VersionKindOrNone};
use crate::graph::VersionGraphStore;
use crate::id::{Id, IdType};
use crate::version::{
    Branch, Change, Common, DefaultRules, Merge, OpenTip, RecordRules, Root, Version, VersionKind,
};

/// The version ids an operation touched, in the order they should be
/// notified to observers.
pub type Touched = Vec<Id>;

impl VersionGraphStore {
    /// Initializes a fresh database: a closed root version and a trunk
    /// branch whose tip is a brand new open version. A no-op (returns the
    /// existing root/trunk) if already set up, so callers can call it
    /// unconditionally on every open.
    pub fn setup(&mut self) -> Result<Touched> {
        let root_id = Id::root_version();
        let trunk_id = Id::trunk_branch();
        if self.versions.contains_key(&root_id) {
            return Ok(Vec::new());
        }

        self.versions.insert(root_id.clone(), Version::Root(Root::default()));
        let tip = self.open_new_tip(&root_id);
        let mut trunk = Branch::trunk(root_id.clone());
        trunk.end = tip.clone();
        self.branches.insert(trunk_id.clone(), trunk);
        self.version_mut(&root_id)?.common_mut().branch = Some(trunk_id);
        Ok(vec![root_id, tip])
    }

    fn version_mut(&mut self, id: &Id) -> Result<&mut Version> {
        self.get_version_mut(id)
    }

    /// Allocates and inserts a fresh open tip whose `previous` is `prev`.
    /// Does not touch any branch; callers splice it in themselves.
    fn open_new_tip(&mut self, prev: &Id) -> Id {
        let id = self.id_info.allocate(IdType::Version, "");
        self.versions.insert(
            id.clone(),
            Version::Open(OpenTip {
                common: Common::default(),
                previous: Some(prev.clone()),
                deltas: BTreeMap::new(),
                unchecked: Vec::new(),
            }),
        );
        id
    }

    /// Replaces the deltas and unchecked set of the open tip named by
    /// `target` (resolving a branch id to its current tip first) wholesale
    /// — this does not merge onto whatever `update` wrote previously, it
    /// replaces it outright. Errors `OpenRequired` if `target` isn't open.
    pub fn update(&mut self, target: &Id, deltas: BTreeMap<Id, Value>, unchecked: Vec<Id>) -> Result<Touched> {
        let version_id = self.to_version_id(target, true)?;
        let open = match self.get_version_mut(&version_id)? {
            Version::Open(o) => o,
            _ => return Err(Error::OpenRequired { id: version_id }),
        };

        open.deltas = deltas;
        open.unchecked = unchecked;

        Ok(vec![version_id])
    }

    /// Freezes the open tip of `branch` into a permanent `Change` version
    /// and opens a new tip after it. Errors `PendingReview` if the tip
    /// still has unchecked records. A no-op (returns `None` and touches
    /// nothing) if the tip has neither deltas nor a revision selection
    /// that differs from what `previous` already sees — nothing would
    /// distinguish the frozen version from `previous` itself.
    pub fn commit(&mut self, branch: &Id) -> Result<(Option<Id>, Touched)> {
        let branch_id = branch.clone();
        let tip_id = self.get_branch(&branch_id)?.end.clone();

        let (previous, deltas, unchecked, common) = match self.get_version(&tip_id)? {
            Version::Open(o) => {
                if !o.unchecked.is_empty() {
                    return Err(Error::PendingReview { id: tip_id });
                }
                (
                    o.previous.clone().unwrap_or_else(Id::root_version),
                    o.deltas.clone(),
                    o.unchecked.clone(),
                    o.common.clone(),
                )
            }
            _ => return Err(Error::OpenRequired { id: tip_id }),
        };

        // Compared while `tip_id` is still open, so this reads the live
        // (uncommitted) revision selection; `previous` is already closed,
        // so its own reads its pinned (as-committed) selection.
        let live_revisions = crate::ancestry::revision_state(self, &tip_id)?;
        let previous_revisions = crate::ancestry::revision_state(self, &previous)?;
        let revision_changes: BTreeMap<Id, Id> = live_revisions
            .iter()
            .filter(|(rev_id, chosen)| previous_revisions.get(rev_id) != Some(chosen))
            .map(|(rev_id, chosen)| (rev_id.clone(), chosen.clone()))
            .collect();

        if deltas.is_empty() && revision_changes.is_empty() {
            return Ok((None, Vec::new()));
        }

        self.versions.insert(
            tip_id.clone(),
            Version::Change(Change {
                common,
                previous,
                deltas,
                unchecked,
                revision_changes,
            }),
        );

        let new_tip = self.open_new_tip(&tip_id);
        self.get_branch_mut(&branch_id)?.end = new_tip.clone();
        self.version_mut(&new_tip)?.common_mut().branch = Some(branch_id);

        Ok((Some(tip_id.clone()), vec![tip_id, new_tip]))
    }

    /// Starts a new branch at `from` (must resolve to a closed version)
    /// and opens its first tip.
    pub fn new_branch(&mut self, from: &Id, user: &str) -> Result<(Id, Touched)> {
        let from_id = self.to_version_id(from, true)?;
        if self.is_open(&from_id)? {
            return Err(Error::ClosedRequired { id: from_id });
        }

        let branch_id = self.id_info.allocate(IdType::Branch, user);
        let tip = self.open_new_tip(&from_id);
        self.branches.insert(
            branch_id.clone(),
            Branch {
                start: from_id.clone(),
                end: tip.clone(),
                timestamp: None,
            },
        );
        self.version_mut(&from_id)?.common_mut().branches_out.push(branch_id.clone());
        self.version_mut(&tip)?.common_mut().branch = Some(branch_id.clone());

        Ok((branch_id, vec![from_id, tip]))
    }

    /// Merges `tributary_version` into the open tip of `primary_branch`,
    /// promoting that same tip to `Merge` kind in place — the same
    /// "operate on the open tip" shape `commit` uses for `Change`. Errors
    /// if the tip already carries uncommitted edits (it must be committed
    /// first) or if `tributary_version` doesn't resolve to a closed
    /// version. The primary branch's tip advances past the promoted merge
    /// version; the tributary branch, if any, is left where it is.
    #[allow(clippy::too_many_arguments)]
    pub fn merge(
        &mut self,
        primary_branch: &Id,
        tributary_version: &Id,
        default: DefaultRules,
        field_rules: BTreeMap<String, crate::merge::Rule>,
        records: BTreeMap<Id, RecordRules>,
    ) -> Result<(Id, Touched)> {
        let branch_id = primary_branch.clone();
        let tip_id = self.get_branch(&branch_id)?.end.clone();

        let common = match self.get_version(&tip_id)? {
            Version::Open(o) => {
                if !o.deltas.is_empty() {
                    return Err(Error::WrongKind {
                        id: tip_id,
                        expected: "open tip with no uncommitted edits",
                        found: VersionKindOrNone::Kind(VersionKind::Change),
                    });
                }
                o.common.clone()
            }
            _ => return Err(Error::OpenRequired { id: tip_id }),
        };

        let previous = self.to_version_id(&branch_id, false)?;
        let tributary_id = self.to_version_id(tributary_version, true)?;
        if self.is_open(&tributary_id)? {
            return Err(Error::ClosedRequired { id: tributary_id });
        }

        self.versions.insert(
            tip_id.clone(),
            Version::Merge(Merge {
                common,
                previous: previous.clone(),
                tributary: tributary_id.clone(),
                default,
                field_rules,
                records,
                revision_changes: BTreeMap::new(),
            }),
        );

        // Only a selection the merge itself newly decided — one neither
        // parent already saw — belongs in `revision_changes`; anything
        // either parent already pinned is inherited, not decided here.
        let merge_revisions = crate::ancestry::revision_state_live(self, &tip_id)?;
        let primary_revisions = crate::ancestry::revision_state(self, &previous)?;
        let tributary_revisions = crate::ancestry::revision_state(self, &tributary_id)?;
        let revision_changes: BTreeMap<Id, Id> = merge_revisions
            .iter()
            .filter(|(rev_id, chosen)| {
                primary_revisions.get(rev_id) != Some(chosen) && tributary_revisions.get(rev_id) != Some(chosen)
            })
            .map(|(rev_id, chosen)| (rev_id.clone(), chosen.clone()))
            .collect();
        if let Version::Merge(m) = self.get_version_mut(&tip_id)? {
            m.revision_changes = revision_changes;
        }

        self.version_mut(&tributary_id)?.common_mut().merged_to.push(tip_id.clone());

        let new_tip = self.open_new_tip(&tip_id);
        self.get_branch_mut(&branch_id)?.end = new_tip.clone();
        self.version_mut(&new_tip)?.common_mut().branch = Some(branch_id);

        Ok((tip_id.clone(), vec![previous, tributary_id, tip_id, new_tip]))
    }

    /// The revision chain head (the entry in `revisions_using` whose own
    /// `next` is `None`), if `original` has ever been revised.
    fn active_revision(&self, original: &Id) -> Result<Option<Id>> {
        for candidate in &self.get_version(original)?.common().revisions_using {
            if let Version::Revision(r) = self.get_version(candidate)? {
                if r.next.is_none() {
                    return Ok(Some(candidate.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Retargets `original` to `new_target`: descendants that don't pin an
    /// earlier ancestry view will transparently see `new_target` instead
    /// of `original` from now on. Creates a fresh revision chained after
    /// any existing one; `new_target` may itself be a branch id, tracked
    /// dynamically (resolved through [`VersionGraphStore::to_version_id`]
    /// at ancestry-walk time) rather than pinned to today's tip.
    pub fn setup_revision(&mut self, original: &Id, new_target: &Id, user: &str) -> Result<(Id, Touched)> {
        let original_id = self.to_version_id(original, true)?;
        if self.is_open(&original_id)? {
            return Err(Error::ClosedRequired { id: original_id });
        }
        let resolved_target = self.to_version_id(new_target, true)?;

        if is_ancestor(self, &original_id, &resolved_target)? {
            return Err(Error::WouldCreateCycle {
                revision: original_id,
                target: resolved_target,
            });
        }

        let previous_head = self.active_revision(&original_id)?;
        let revision_id = self.id_info.allocate(IdType::Version, user);
        self.versions.insert(
            revision_id.clone(),
            Version::Revision(crate::version::Revision {
                common: Common::default(),
                original: original_id.clone(),
                current: new_target.clone(),
                previous: previous_head.clone(),
                next: None,
            }),
        );

        if let Some(head) = &previous_head {
            if let Version::Revision(r) = self.get_version_mut(head)? {
                r.next = Some(revision_id.clone());
            }
        }
        self.version_mut(&original_id)?.common_mut().revisions_using.push(revision_id.clone());

        Ok((revision_id.clone(), vec![original_id, revision_id]))
    }

    /// Re-targets an existing revision chain's `current` in place, without
    /// creating a new chain link (unlike `setup_revision`, which always
    /// grows the chain).
    pub fn revise(&mut self, original: &Id, new_target: &Id) -> Result<Touched> {
        let original_id = self.to_version_id(original, true)?;
        let resolved_target = self.to_version_id(new_target, true)?;

        if is_ancestor(self, &original_id, &resolved_target)? {
            return Err(Error::WouldCreateCycle {
                revision: original_id,
                target: resolved_target,
            });
        }

        let Some(head) = self.active_revision(&original_id)? else {
            return Err(Error::NotFound {
                kind: "revision",
                id: original_id,
            });
        };

        match self.get_version_mut(&head)? {
            Version::Revision(r) => r.current = new_target.clone(),
            _ => unreachable!("active_revision only returns revision ids"),
        }
        Ok(vec![head])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_delta(record: &Id, field: &str, value: Value) -> BTreeMap<Id, Value> {
        BTreeMap::from([(record.clone(), Value::Map(BTreeMap::from([(field.to_string(), value)])))])
    }

    #[test]
    fn setup_is_idempotent() {
        let mut store = VersionGraphStore::default();
        let first = store.setup().unwrap();
        assert_eq!(first.len(), 2);
        let second = store.setup().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn update_then_commit_produces_change_and_new_tip() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();

        let record = store.id_info.allocate(IdType::Record, "");
        store.update(&tip, field_delta(&record, "name", Value::from("Ada")), Vec::new()).unwrap();
        let (committed, _) = store.commit(&trunk).unwrap();
        assert_eq!(committed, Some(tip.clone()));

        assert_eq!(store.get_version(&tip).unwrap().kind(), Some(VersionKind::Change));
        let new_tip = store.get_branch(&trunk).unwrap().end.clone();
        assert_ne!(new_tip, tip);
        assert!(store.is_open(&new_tip).unwrap());
    }

    #[test]
    fn commit_with_pending_review_fails() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();
        let record = store.id_info.allocate(IdType::Record, "");
        store.update(&tip, field_delta(&record, "name", Value::from("Ada")), vec![record]).unwrap();

        let err = store.commit(&trunk);
        assert!(matches!(err, Err(Error::PendingReview { .. })));
    }

    #[test]
    fn new_branch_requires_closed_start() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();
        let err = store.new_branch(&tip, "");
        assert!(matches!(err, Err(Error::ClosedRequired { .. })));
    }

    #[test]
    fn setup_revision_requires_closed_original() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();
        let err = store.setup_revision(&tip, &tip, "");
        assert!(matches!(err, Err(Error::ClosedRequired { .. })));
    }

    #[test]
    fn revising_a_version_to_itself_is_a_cycle() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();
        let record = store.id_info.allocate(IdType::Record, "");
        store.update(&tip, field_delta(&record, "name", Value::from("x")), Vec::new()).unwrap();
        store.commit(&trunk).unwrap();
        let base = store.get_branch(&trunk).unwrap().end.clone();

        let err = store.setup_revision(&base, &base, "");
        assert!(matches!(err, Err(Error::WouldCreateCycle { .. })));
    }

    #[test]
    fn setup_revision_chains_successive_revisions() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let record = store.id_info.allocate(IdType::Record, "");

        let tip = store.get_branch(&trunk).unwrap().end.clone();
        store.update(&tip, field_delta(&record, "name", Value::from("base")), Vec::new()).unwrap();
        store.commit(&trunk).unwrap();
        let base = store.get_branch(&trunk).unwrap().end.clone();

        let (other_branch, _) = store.new_branch(&base, "").unwrap();
        let alt1 = store.get_branch(&other_branch).unwrap().end.clone();
        store.update(&alt1, field_delta(&record, "name", Value::from("alt1")), Vec::new()).unwrap();
        store.commit(&other_branch).unwrap();

        let (rev1, _) = store.setup_revision(&base, &alt1, "").unwrap();
        assert_eq!(store.get_version(&base).unwrap().common().revisions_using, vec![rev1.clone()]);

        let (other_branch2, _) = store.new_branch(&alt1, "").unwrap();
        let alt2 = store.get_branch(&other_branch2).unwrap().end.clone();
        store.update(&alt2, field_delta(&record, "name", Value::from("alt2")), Vec::new()).unwrap();
        store.commit(&other_branch2).unwrap();

        let (rev2, _) = store.setup_revision(&base, &alt2, "").unwrap();
        match store.get_version(&rev1).unwrap() {
            Version::Revision(r) => assert_eq!(r.next, Some(rev2.clone())),
            _ => panic!("expected revision"),
        }
        assert_eq!(
            store.get_version(&base).unwrap().common().revisions_using,
            vec![rev1, rev2]
        );
    }

    #[test]
    fn commit_is_idempotent_on_empty_edits() {
        let mut store = VersionGraphStore::default();
        store.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = store.get_branch(&trunk).unwrap().end.clone();

        let (committed, touched) = store.commit(&trunk).unwrap();
        assert_eq!(committed, None);
        assert!(touched.is_empty());
        assert!(store.is_open(&tip).unwrap(), "a no-op commit must not freeze the tip");
        assert_eq!(store.get_branch(&trunk).unwrap().end, tip, "a no-op commit must not advance the branch");
    }
}
