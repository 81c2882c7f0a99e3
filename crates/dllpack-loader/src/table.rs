//! Entry tables
//!
//! Three read-only tables describe a packed artifact: importable modules,
//! data files and redirects. Tables generated into the artifact's source are
//! `&'static` slices terminated by [`Entry::SENTINEL`]; tables parsed out of
//! an appended payload are owned.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

use dllpack_format::{RawEntry, RawTables};

use crate::error::LoaderError;

/// Accessor generated per section-embedded resource.
pub type SectionAccessor = fn() -> Option<&'static [u8]>;

/// Storage reference of a section-embedded resource.
pub type SectionRef = Option<SectionAccessor>;

/// Numeric id of a resource in the artifact's resource table. Zero is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An opaque storage handle carried by an [`Entry`].
pub trait StorageKey: Copy + fmt::Debug {
    /// The "no resource" handle used by sentinels and redirects.
    const NONE: Self;

    /// Stable identity used to detect reuse across tables, if any.
    fn identity(&self) -> Option<u64>;
}

impl StorageKey for ResourceId {
    const NONE: Self = ResourceId(0);

    fn identity(&self) -> Option<u64> {
        (self.0 != 0).then_some(self.0 as u64)
    }
}

impl StorageKey for SectionRef {
    const NONE: Self = None;

    fn identity(&self) -> Option<u64> {
        self.map(|accessor| accessor as usize as u64)
    }
}

/// One table record.
#[derive(Debug, Clone)]
pub struct Entry<R> {
    /// Dotted module name, or the data path for data entries
    pub name: Cow<'static, str>,
    /// Path relative to the artifact's directory, used for diagnostics
    pub origin: Cow<'static, str>,
    /// Where the bytes live
    pub storage: R,
    /// Whether the entry is a package
    pub is_package: bool,
}

impl<R: StorageKey> Entry<R> {
    /// Table terminator.
    pub const SENTINEL: Self = Entry {
        name: Cow::Borrowed(""),
        origin: Cow::Borrowed(""),
        storage: R::NONE,
        is_package: false,
    };

    /// Entry for a generated table.
    pub const fn new(
        name: &'static str,
        origin: &'static str,
        storage: R,
        is_package: bool,
    ) -> Self {
        Entry {
            name: Cow::Borrowed(name),
            origin: Cow::Borrowed(origin),
            storage,
            is_package,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.name.is_empty()
    }
}

/// A sentinel-terminated table, trimmed to its live entries.
#[derive(Debug, Clone)]
pub struct EntryTable<R: 'static + Clone> {
    entries: Cow<'static, [Entry<R>]>,
}

impl<R: StorageKey + 'static> EntryTable<R> {
    /// Wrap a generated table. Entries after the first sentinel are ignored.
    pub fn from_static(entries: &'static [Entry<R>]) -> Self {
        let end = entries
            .iter()
            .position(Entry::is_sentinel)
            .unwrap_or(entries.len());
        Self {
            entries: Cow::Borrowed(&entries[..end]),
        }
    }

    /// Wrap an owned table. Entries after the first sentinel are dropped.
    pub fn from_entries(mut entries: Vec<Entry<R>>) -> Self {
        if let Some(end) = entries.iter().position(Entry::is_sentinel) {
            entries.truncate(end);
        }
        Self {
            entries: Cow::Owned(entries),
        }
    }

    pub fn empty() -> Self {
        Self {
            entries: Cow::Owned(Vec::new()),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry<R>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three tables of one artifact plus its importer-setup code unit.
#[derive(Debug, Clone)]
pub struct PackTables<R: StorageKey + 'static> {
    pub imports: EntryTable<R>,
    pub data: EntryTable<R>,
    pub redirects: EntryTable<R>,
    /// Code run once before the main module on first execution
    pub bootstrap: Option<Entry<R>>,
}

impl<R: StorageKey + 'static> PackTables<R> {
    pub fn new(imports: EntryTable<R>, data: EntryTable<R>, redirects: EntryTable<R>) -> Self {
        Self {
            imports,
            data,
            redirects,
            bootstrap: None,
        }
    }

    /// Tables from generated static arrays.
    pub fn from_static(
        imports: &'static [Entry<R>],
        data: &'static [Entry<R>],
        redirects: &'static [Entry<R>],
    ) -> Self {
        Self::new(
            EntryTable::from_static(imports),
            EntryTable::from_static(data),
            EntryTable::from_static(redirects),
        )
    }

    pub fn with_bootstrap(mut self, entry: Entry<R>) -> Self {
        self.bootstrap = Some(entry);
        self
    }

    /// Check the table invariants.
    ///
    /// Import names are unique, and no storage handle is shared between the
    /// code tables and the data table.
    pub fn validate(&self) -> Result<(), LoaderError> {
        let mut seen = HashSet::with_capacity(self.imports.len());
        for entry in self.imports.iter() {
            if !seen.insert(&*entry.name) {
                return Err(LoaderError::InvalidFraming {
                    name: entry.name.to_string(),
                    reason: "duplicate name in import table".to_string(),
                });
            }
        }

        let mut code_refs: HashMap<u64, &str> = HashMap::new();
        let code_entries = self.imports.iter().chain(self.bootstrap.iter());
        for entry in code_entries {
            if let Some(id) = entry.storage.identity() {
                code_refs.insert(id, &*entry.name);
            }
        }
        for entry in self.data.iter() {
            if let Some(id) = entry.storage.identity() {
                if let Some(code_name) = code_refs.get(&id) {
                    return Err(LoaderError::InvalidFraming {
                        name: entry.name.to_string(),
                        reason: format!(
                            "storage {:?} is also used by module '{}'",
                            entry.storage, code_name
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Entry<ResourceId> {
    fn from_raw(raw: RawEntry) -> Self {
        Entry {
            name: Cow::Owned(raw.name),
            origin: Cow::Owned(raw.origin),
            storage: ResourceId(raw.resource_id),
            is_package: raw.is_package,
        }
    }
}

impl PackTables<ResourceId> {
    /// Tables parsed from an appended payload.
    ///
    /// A non-zero `bootstrap_id` names the importer-setup code unit, which
    /// runs under the package's own name.
    pub fn from_raw(raw: RawTables, bootstrap_id: u32, module_name: &str) -> Self {
        let convert = |entries: Vec<RawEntry>| {
            EntryTable::from_entries(entries.into_iter().map(Entry::from_raw).collect())
        };
        let tables = Self::new(
            convert(raw.imports),
            convert(raw.data),
            convert(raw.redirects),
        );
        if bootstrap_id == 0 {
            return tables;
        }
        tables.with_bootstrap(Entry {
            name: Cow::Owned(module_name.to_string()),
            origin: Cow::Owned(module_name.to_string()),
            storage: ResourceId(bootstrap_id),
            is_package: false,
        })
    }
}
