//! Name resolution against the entry tables

use std::fmt;

use tracing::debug;

use crate::table::{Entry, EntryTable, PackTables, StorageKey};

/// Classification of a dotted name against the import table.
pub enum Match<'t, R> {
    /// Leaf module entry
    Exact(&'t Entry<R>),
    /// Package entry
    ExactPackage(&'t Entry<R>),
    /// Strict dotted prefix of some entry, with no entry of its own
    ImpliedPackage,
    NotFound,
}

impl<R> Clone for Match<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Match<'_, R> {}

impl<R: fmt::Debug> fmt::Debug for Match<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Match::Exact(entry) => f.debug_tuple("Exact").field(&entry.name).finish(),
            Match::ExactPackage(entry) => f.debug_tuple("ExactPackage").field(&entry.name).finish(),
            Match::ImpliedPackage => f.write_str("ImpliedPackage"),
            Match::NotFound => f.write_str("NotFound"),
        }
    }
}

impl<'t, R> Match<'t, R> {
    pub fn entry(&self) -> Option<&'t Entry<R>> {
        match *self {
            Match::Exact(entry) | Match::ExactPackage(entry) => Some(entry),
            Match::ImpliedPackage | Match::NotFound => None,
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self, Match::ExactPackage(_) | Match::ImpliedPackage)
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Match::NotFound)
    }
}

/// Returns the part of `name` after `prefix + "."`, if `name` lies under `prefix`.
fn strip_package<'n>(name: &'n str, prefix: &str) -> Option<&'n str> {
    name.strip_prefix(prefix)?.strip_prefix('.')
}

/// Resolve `name` against an import table.
///
/// Every entry is scanned: an exact match anywhere outranks a prefix match
/// seen earlier. The empty name is an implied package when any dotted name
/// exists.
pub fn resolve<'t, R: StorageKey + 'static>(table: &'t EntryTable<R>, name: &str) -> Match<'t, R> {
    let mut implied = false;
    for entry in table.iter() {
        if entry.name == name {
            return if entry.is_package {
                Match::ExactPackage(entry)
            } else {
                Match::Exact(entry)
            };
        }
        if !implied {
            implied = if name.is_empty() {
                entry.name.contains('.')
            } else {
                strip_package(&entry.name, name).is_some()
            };
        }
    }
    if implied {
        Match::ImpliedPackage
    } else {
        Match::NotFound
    }
}

/// Exact-name lookup used for the data and redirect tables.
pub fn lookup<'t, R: StorageKey + 'static>(table: &'t EntryTable<R>, name: &str) -> Option<&'t Entry<R>> {
    table.iter().find(|entry| entry.name == name)
}

/// Direct children of `prefix` as `(leaf, is_package)`.
///
/// The empty prefix is the parent of every dotted name, so it lists those
/// names in full. Names starting with `.` are hidden.
pub fn module_names<R: StorageKey + 'static>(table: &EntryTable<R>, prefix: &str) -> Vec<(String, bool)> {
    table
        .iter()
        .filter(|entry| !entry.name.starts_with('.'))
        .filter_map(|entry| {
            let listed = if prefix.is_empty() {
                entry.name.contains('.').then(|| &*entry.name)
            } else {
                strip_package(&entry.name, prefix)
                    .filter(|leaf| !leaf.is_empty() && !leaf.contains('.'))
            }?;
            Some((listed.to_string(), entry.is_package))
        })
        .collect()
}

/// Read-only view over one artifact's tables.
pub struct Resolver<'t, R: StorageKey + 'static> {
    tables: &'t PackTables<R>,
}

impl<'t, R: StorageKey + 'static> Resolver<'t, R> {
    pub fn new(tables: &'t PackTables<R>) -> Self {
        Self { tables }
    }

    pub fn resolve(&self, name: &str) -> Match<'t, R> {
        let found = resolve(&self.tables.imports, name);
        debug!(name, result = ?found, "resolved import");
        found
    }

    pub fn data(&self, name: &str) -> Option<&'t Entry<R>> {
        lookup(&self.tables.data, name)
    }

    pub fn redirect(&self, name: &str) -> Option<&'t Entry<R>> {
        lookup(&self.tables.redirects, name)
    }

    pub fn module_names(&self, prefix: &str) -> Vec<(String, bool)> {
        module_names(&self.tables.imports, prefix)
    }

    pub fn data_names(&self) -> Vec<String> {
        self.tables.data.iter().map(|entry| entry.name.to_string()).collect()
    }
}
