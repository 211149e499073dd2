//! Directory-of-JSON-documents persistence.
//!
//! Grounded in `db.rs`/`*_tree.rs`'s open/read/write shape —
//! separate logical tables, opened together, read/written as whole
//! values — generalized from `sled` trees to a directory of JSON files:
//! no crash-safe transactions, just plain document files written whole.
//! `serde`/`serde_json` are the obvious ecosystem fit, the same way the
//! rest of the corpus reaches for them.

use ahash::AHashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::graph::{IdInfo, VersionGraphStore};
use crate::id::Id;
use crate::version::{Branch, Version, ViewRecord};

/// A directory-backed handle for loading and saving a
/// [`VersionGraphStore`]. Layout:
///
/// ```text
/// <root>/id_info.json
/// <root>/versions/<id>.json
/// <root>/branches/<id>.json
/// <root>/views/<id>.json
/// ```
pub struct Persistence {
    root: PathBuf,
}

impl Persistence {
    pub fn new(root: impl Into<PathBuf>) -> Persistence {
        Persistence { root: root.into() }
    }

    fn id_info_path(&self) -> PathBuf {
        self.root.join("id_info.json")
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn entry_path(&self, name: &str, id: &Id) -> PathBuf {
        self.dir(name).join(format!("{}.json", sanitize(id.as_str())))
    }

    /// Loads a store from disk. A brand new, empty directory loads as an
    /// empty store (callers then call `setup()`). A document that fails
    /// to parse is skipped with a `warn` log, not fatal to the load.
    pub fn load(&self) -> Result<VersionGraphStore> {
        fs::create_dir_all(&self.root)?;

        let id_info = match fs::read_to_string(self.id_info_path()) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                log::warn!("id_info.json failed to parse, starting from empty counters: {err}");
                IdInfo::default()
            }),
            Err(_) => IdInfo::default(),
        };

        let versions = load_dir::<Version>(&self.dir("versions"))?;
        let branches = load_dir::<Branch>(&self.dir("branches"))?;
        let views = load_dir::<ViewRecord>(&self.dir("views"))?;

        Ok(VersionGraphStore {
            versions,
            branches,
            views,
            id_info,
        })
    }

    /// Writes every entry currently in memory, as a whole-file replace
    /// per document. Never lists a directory to decide what to delete —
    /// a file not tracked by any in-memory map is left alone.
    pub fn save(&self, store: &VersionGraphStore) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        write_json(self.id_info_path(), &store.id_info)?;

        save_dir(&self.dir("versions"), store.versions.iter(), |id| self.entry_path("versions", id))?;
        save_dir(&self.dir("branches"), store.branches.iter(), |id| self.entry_path("branches", id))?;
        save_dir(&self.dir("views"), store.views.iter(), |id| self.entry_path("views", id))?;
        Ok(())
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_json(path: PathBuf, value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

fn load_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<AHashMap<Id, T>> {
    fs::create_dir_all(dir)?;
    let mut out = AHashMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Ok(text) = fs::read_to_string(&path) else { continue };
        match serde_json::from_str::<T>(&text) {
            Ok(value) => match Id::parse(stem) {
                Ok(id) => {
                    out.insert(id, value);
                }
                Err(err) => log::warn!("skipping {}: filename isn't a valid id ({err})", path.display()),
            },
            Err(err) => log::warn!("skipping {}: failed to parse ({err})", path.display()),
        }
    }
    Ok(out)
}

fn save_dir<'a, T: serde::Serialize + 'a>(
    dir: &Path,
    entries: impl Iterator<Item = (&'a Id, &'a T)>,
    path_for: impl Fn(&Id) -> PathBuf,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (id, value) in entries {
        write_json(path_for(id), value)?;
    }
    Ok(())
}
