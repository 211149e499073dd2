//! `verdb`: a versioned, branchable record database.
//!
//! A DAG of versions (root, incremental changes, three-way merges, and
//! retroactive revisions) plus named branches over it. Records are plain
//! template-validated JSON-shaped trees; edits are expressed as deltas and
//! folded lazily by the state evaluator. This is a library crate: the
//! interactive command interface, filesystem watching, and view layers
//! described alongside this design are someone else's problem — `verdb`
//! owns the graph, the merge rules, and on-disk persistence of both.
//!
//! One `src/` directory, one module per concern, `#[cfg(test)] mod tests`
//! blocks at the bottom of the file they exercise.

pub mod ancestry;
pub mod container;
pub mod error;
pub mod graph;
pub mod id;
pub mod merge;
pub mod observer;
pub mod ops;
pub mod persist;
pub mod state;
pub mod version;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub use container::{Container, Template, Value};
pub use error::{Error, Result};
pub use id::{Id, IdType};
pub use merge::{DefaultRules, InheritPriority, Rule};
pub use observer::ChangeObserver;
pub use version::{Branch, RecordRules, Version, VersionKind};

use graph::VersionGraphStore;
use observer::ObserverRegistry;
use ops::Touched;
use persist::Persistence;

/// The database handle: the version graph store, an optional persistence
/// backend, an observer registry, and the record template registry
/// templates are validated against when callers build a [`Container`] for
/// a new record through this handle.
pub struct Database {
    store: VersionGraphStore,
    persistence: Option<Persistence>,
    observers: ObserverRegistry,
    templates: HashMap<String, Template>,
}

impl Database {
    /// A pure in-memory database with no template registry, matching
    /// `database.py`'s `Database(path=None, data=None)` constructor — the
    /// mode the original test suite relies on almost exclusively.
    pub fn new_in_memory() -> Database {
        Database {
            store: VersionGraphStore::default(),
            persistence: None,
            observers: ObserverRegistry::default(),
            templates: HashMap::new(),
        }
    }

    /// Opens an existing on-disk database, loading whatever is there
    /// without running `setup()` — the caller decides whether a fresh
    /// directory should be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let persistence = Persistence::new(path.as_ref().to_path_buf());
        let store = persistence.load()?;
        Ok(Database {
            store,
            persistence: Some(persistence),
            observers: ObserverRegistry::default(),
            templates: HashMap::new(),
        })
    }

    /// Opens (creating if necessary) an on-disk database and ensures it's
    /// set up, registering `templates` for later record validation.
    pub fn create(path: impl AsRef<Path>, templates: HashMap<String, Template>) -> Result<Database> {
        let mut db = Database::open(path)?;
        db.templates = templates;
        db.setup()?;
        Ok(db)
    }

    fn finish(&mut self, touched: Touched) -> Result<Touched> {
        if let Some(persistence) = &self.persistence {
            persistence.save(&self.store)?;
        }
        self.observers.notify_all(&touched);
        Ok(touched)
    }

    pub fn register_observer(&mut self, observer: Box<dyn ChangeObserver>) {
        self.observers.register(observer);
    }

    pub fn setup(&mut self) -> Result<()> {
        let touched = self.store.setup()?;
        self.finish(touched)?;
        Ok(())
    }

    pub fn update(&mut self, target: &Id, deltas: BTreeMap<Id, Value>, unchecked: Vec<Id>) -> Result<()> {
        let touched = self.store.update(target, deltas, unchecked)?;
        self.finish(touched)?;
        Ok(())
    }

    /// Commits the open tip of `branch`, returning the id of the version
    /// that was just frozen into a `Change`, or `None` if the tip had
    /// neither deltas nor a changed revision selection — nothing was
    /// touched and the tip is still open.
    pub fn commit(&mut self, branch: &Id) -> Result<Option<Id>> {
        let (committed, touched) = self.store.commit(branch)?;
        self.finish(touched)?;
        Ok(committed)
    }

    pub fn new_branch(&mut self, from: &Id, user: &str) -> Result<Id> {
        let (branch_id, touched) = self.store.new_branch(from, user)?;
        self.finish(touched)?;
        Ok(branch_id)
    }

    /// Merges `tributary_version` (must resolve to a closed version) into
    /// `primary_branch`'s open tip, promoting that tip to a `Merge` in
    /// place. Errors if the tip already has uncommitted edits — commit it
    /// first.
    pub fn merge(
        &mut self,
        primary_branch: &Id,
        tributary_version: &Id,
        default: DefaultRules,
        field_rules: BTreeMap<String, Rule>,
        records: BTreeMap<Id, RecordRules>,
    ) -> Result<Id> {
        let (merge_id, touched) =
            self.store.merge(primary_branch, tributary_version, default, field_rules, records)?;
        self.finish(touched)?;
        Ok(merge_id)
    }

    pub fn setup_revision(&mut self, original: &Id, new_target: &Id, user: &str) -> Result<Id> {
        let (revision_id, touched) = self.store.setup_revision(original, new_target, user)?;
        self.finish(touched)?;
        Ok(revision_id)
    }

    pub fn revise(&mut self, original: &Id, new_target: &Id) -> Result<()> {
        let touched = self.store.revise(original, new_target)?;
        self.finish(touched)?;
        Ok(())
    }

    pub fn compute_state(&self, target: &Id) -> Result<BTreeMap<Id, Value>> {
        state::compute_state(&self.store, target)
    }

    pub fn ancestors(&self, id: &Id) -> Result<Vec<Id>> {
        ancestry::ancestors(&self.store, id)
    }

    pub fn find_lca(&self, a: &Id, b: &Id) -> Result<Id> {
        ancestry::find_lca(&self.store, a, b)
    }

    pub fn is_ancestor(&self, ancestor: &Id, descendant: &Id) -> Result<bool> {
        ancestry::is_ancestor(&self.store, ancestor, descendant)
    }

    pub fn get_version(&self, id: &Id) -> Result<&Version> {
        self.store.get_version(id)
    }

    pub fn get_branch(&self, id: &Id) -> Result<&Branch> {
        self.store.get_branch(id)
    }

    pub fn version_kind(&self, id: &Id) -> Result<Option<VersionKind>> {
        self.store.version_kind(id)
    }

    pub fn to_version_id(&self, id: &Id, allow_open: bool) -> Result<Id> {
        self.store.to_version_id(id, allow_open)
    }

    /// An empty, mutable, template-validated container for a record of
    /// the named type. Its delta against an existing record's snapshot is
    /// what `update()` expects in its `deltas` map.
    pub fn record_container(&self, type_name: &str) -> Result<Container> {
        let template = self
            .templates
            .get(type_name)
            .cloned()
            .unwrap_or(Template::Any);
        Ok(Container::empty(type_name.to_string(), template))
    }

    pub fn validate_record(&self, type_name: &str, value: &Value) -> Result<()> {
        let template = self.templates.get(type_name).unwrap_or(&Template::Any);
        template.validate(value, type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_for(record: &Id, field: &str, value: Value) -> BTreeMap<Id, Value> {
        BTreeMap::from([(record.clone(), Value::Map(BTreeMap::from([(field.to_string(), value)])))])
    }

    /// S1: set up, edit, commit, read back the materialized state.
    #[test]
    fn s1_commit_and_read_state() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = db.get_branch(&trunk).unwrap().end.clone();

        let record = Id::compose(Some(IdType::Record), "", "ba");
        db.update(&tip, delta_for(&record, "name", Value::from("Ada")), Vec::new()).unwrap();
        let committed = db.commit(&trunk).unwrap().expect("non-empty commit must return an id");

        let state = db.compute_state(&committed).unwrap();
        assert_eq!(
            state.get(&record).unwrap().as_map().unwrap().get("name"),
            Some(&Value::from("Ada"))
        );
    }

    /// S2: branch, diverge, merge with a record-level explicit rule.
    #[test]
    fn s2_branch_and_merge_with_explicit_rule() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let record = Id::compose(Some(IdType::Record), "", "ba");

        let tip = db.get_branch(&trunk).unwrap().end.clone();
        db.update(&tip, delta_for(&record, "name", Value::from("base")), Vec::new()).unwrap();
        db.commit(&trunk).unwrap();
        let base_version = tip; // now closed, since commit freezes the id in place

        let feature = db.new_branch(&base_version, "").unwrap();

        let feature_tip = db.get_branch(&feature).unwrap().end.clone();
        db.update(&feature_tip, delta_for(&record, "name", Value::from("from-feature")), Vec::new())
            .unwrap();
        let feature_version = db.commit(&feature).unwrap().unwrap();

        let trunk_tip = db.get_branch(&trunk).unwrap().end.clone();
        db.update(&trunk_tip, delta_for(&record, "name", Value::from("from-trunk")), Vec::new())
            .unwrap();
        db.commit(&trunk).unwrap();

        let mut records = BTreeMap::new();
        records.insert(
            record.clone(),
            RecordRules {
                rule: Some(Rule::Tributary),
                fields: BTreeMap::new(),
            },
        );
        let merge_id = db
            .merge(&trunk, &feature_version, DefaultRules::default(), BTreeMap::new(), records)
            .unwrap();

        let state = db.compute_state(&merge_id).unwrap();
        assert_eq!(
            state.get(&record).unwrap().as_map().unwrap().get("name"),
            Some(&Value::from("from-feature"))
        );
    }

    /// S3: pending review blocks commit until cleared.
    #[test]
    fn s3_pending_review_blocks_commit() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = db.get_branch(&trunk).unwrap().end.clone();
        let record = Id::compose(Some(IdType::Record), "", "ba");

        db.update(&tip, delta_for(&record, "name", Value::from("x")), vec![record.clone()])
            .unwrap();
        assert!(matches!(db.commit(&trunk), Err(Error::PendingReview { .. })));

        db.update(&tip, BTreeMap::new(), Vec::new()).unwrap();
        assert!(db.commit(&trunk).is_ok());
    }

    /// S4: a revision transparently retargets ancestry for an open view,
    /// but a closed (already-committed) descendant still sees the
    /// original history it was committed against.
    #[test]
    fn s4_revision_retargets_open_but_not_closed_descendants() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let record = Id::compose(Some(IdType::Record), "", "ba");
        let base = db.get_branch(&trunk).unwrap().end.clone();
        db.update(&base, delta_for(&record, "name", Value::from("base")), Vec::new()).unwrap();
        db.commit(&trunk).unwrap(); // freezes `base` into a Change in place

        let alt_branch = db.new_branch(&base, "").unwrap();
        let alt_tip = db.get_branch(&alt_branch).unwrap().end.clone();
        db.update(&alt_tip, delta_for(&record, "name", Value::from("alt")), Vec::new()).unwrap();
        db.commit(&alt_branch).unwrap(); // freezes `alt_tip` into a Change in place

        db.setup_revision(&base, &alt_tip, "").unwrap();

        // A fresh open tip on trunk (nothing pinned) sees the revision.
        let live_tip = db.get_branch(&trunk).unwrap().end.clone();
        assert!(db.is_ancestor(&alt_tip, &live_tip).unwrap());
    }

    /// S5: revising a version to one of its own descendants is rejected.
    #[test]
    fn s5_revision_cycle_rejected() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let record = Id::compose(Some(IdType::Record), "", "ba");
        let base = db.get_branch(&trunk).unwrap().end.clone();
        db.update(&base, delta_for(&record, "name", Value::from("x")), Vec::new()).unwrap();
        db.commit(&trunk).unwrap(); // freezes `base`, opens a new descendant tip
        let descendant = db.get_branch(&trunk).unwrap().end.clone();

        let err = db.setup_revision(&base, &descendant, "");
        assert!(matches!(err, Err(Error::WouldCreateCycle { .. })));
    }

    /// S6: commit is idempotent on empty edits.
    #[test]
    fn s6_commit_is_idempotent_on_empty_edits() {
        let mut db = Database::new_in_memory();
        db.setup().unwrap();
        let trunk = Id::trunk_branch();
        let tip = db.get_branch(&trunk).unwrap().end.clone();

        assert_eq!(db.commit(&trunk).unwrap(), None);
        assert_eq!(db.get_branch(&trunk).unwrap().end, tip);
        assert!(db.version_kind(&tip).unwrap().is_none(), "tip must remain open");
    }

    /// Template validation rejects a record whose shape doesn't match its
    /// registered type.
    #[test]
    fn template_validation_rejects_wrong_shape() {
        let mut templates = HashMap::new();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Template::String);
        templates.insert("person".to_string(), Template::Map(fields));

        let dir = std::env::temp_dir().join(format!("verdb-s6-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Database::create(&dir, templates).unwrap();

        let good = Value::Map(BTreeMap::from([("name".to_string(), Value::from("Ada"))]));
        assert!(db.validate_record("person", &good).is_ok());

        let bad = Value::Map(BTreeMap::from([("name".to_string(), Value::Number(1.0))]));
        assert!(db.validate_record("person", &bad).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
