//! The version graph store: in-memory tables for versions, branches, and
//! views, plus the id allocator's counters.
//!
//! Grounded in `database.py`'s `self.versions`/`self.branches`/`self.views`
//! dicts and `_next_version_id`/`_next_branch_id`/`_next_view_id`, and in
//! `GridDb`'s pattern of holding multiple logical tables side by side
//! (there: separate `sled::Tree`s; here: separate `HashMap`s, since the
//! persistence layer is a directory of JSON files rather than a
//! transactional engine).

use std::collections::HashMap;

use ahash::AHashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{Id, IdType};
use crate::version::{Branch, Version, VersionKind, ViewRecord};

/// The four id-sequence counters, one per [`IdType`], each the last
/// sequence issued regardless of user scope (sequences must be globally
/// unique per type; the user-scope portion of an id is an annotation, not
/// part of the uniqueness guarantee).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdInfo {
    last_sequence: HashMap<IdType, String>,
}

impl IdInfo {
    /// Allocates the next id of `id_type` for `user`, advancing the
    /// counter. The very first id of a type starts at the shortest
    /// pronounceable sequence, `"ba"`.
    pub fn allocate(&mut self, id_type: IdType, user: &str) -> Id {
        let next_seq = match self.last_sequence.get(&id_type) {
            Some(seq) => crate::id::next_sequence(seq),
            None => "ba".to_string(),
        };
        self.last_sequence.insert(id_type, next_seq.clone());
        Id::compose(Some(id_type), user, &next_seq)
    }
}

/// The in-memory version graph: everything `ops.rs` reads and mutates.
#[derive(Debug, Clone, Default)]
pub struct VersionGraphStore {
    pub versions: AHashMap<Id, Version>,
    pub branches: AHashMap<Id, Branch>,
    pub views: AHashMap<Id, ViewRecord>,
    pub id_info: IdInfo,
}

impl VersionGraphStore {
    pub fn get_version(&self, id: &Id) -> Result<&Version> {
        self.versions.get(id).ok_or_else(|| Error::NotFound {
            kind: "version",
            id: id.clone(),
        })
    }

    pub fn get_version_mut(&mut self, id: &Id) -> Result<&mut Version> {
        self.versions.get_mut(id).ok_or_else(|| Error::NotFound {
            kind: "version",
            id: id.clone(),
        })
    }

    pub fn get_branch(&self, id: &Id) -> Result<&Branch> {
        self.branches.get(id).ok_or_else(|| Error::NotFound {
            kind: "branch",
            id: id.clone(),
        })
    }

    pub fn get_branch_mut(&mut self, id: &Id) -> Result<&mut Branch> {
        self.branches.get_mut(id).ok_or_else(|| Error::NotFound {
            kind: "branch",
            id: id.clone(),
        })
    }

    /// The kind of a version, or `None` for an open tip. `NotFound` if no
    /// version with that id exists at all.
    pub fn version_kind(&self, id: &Id) -> Result<Option<VersionKind>> {
        Ok(self.get_version(id)?.kind())
    }

    pub fn is_open(&self, id: &Id) -> Result<bool> {
        Ok(self.get_version(id)?.is_open())
    }

    /// Resolves a branch id to the version its tip (`end`) currently
    /// points at; resolves a version id to itself. This is the "either a
    /// version id or a branch id names a version" convenience the public
    /// API relies on throughout.
    ///
    /// When `allow_open` is `false`, a resolved open tip is walked back to
    /// its `previous` instead — the last *closed* version on that lineage
    /// — failing with [`Error::OpenRequired`] if there is none. This is
    /// how a caller asks for "the branch's last closed version" rather
    /// than its mutable tip.
    pub fn to_version_id(&self, id: &Id, allow_open: bool) -> Result<Id> {
        let resolved = if id.id_type() == Some(IdType::Branch) {
            self.get_branch(id)?.end.clone()
        } else {
            self.get_version(id)?;
            id.clone()
        };

        if allow_open || !self.is_open(&resolved)? {
            return Ok(resolved);
        }

        self.get_version(&resolved)?
            .previous()
            .cloned()
            .ok_or(Error::OpenRequired { id: resolved })
    }
}
