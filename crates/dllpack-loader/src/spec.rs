//! Module specs and module records
//!
//! A [`ModuleSpec`] is what the host import system asks for before creating a
//! module; a [`ModuleRecord`] carries the same fields onto the created module.

/// Which loader handles a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderRef {
    /// This artifact loads the module
    Packed,
    /// Redirect: the host must fall through to the next loader in its chain
    NotHandled,
    /// Redirect handed to the host's native extension loader
    External { name: String, origin: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    /// Diagnostic path: origin directory plus the entry's relative origin
    pub origin: String,
    pub loader: LoaderRef,
    pub is_package: bool,
    /// Present for packages only
    pub submodule_search_locations: Option<Vec<String>>,
    /// The name itself for packages, else everything before the last `.`
    pub parent: String,
}

impl ModuleSpec {
    pub fn new(name: &str, origin: String, loader: LoaderRef, is_package: bool) -> Self {
        Self {
            name: name.to_string(),
            origin,
            loader,
            is_package,
            submodule_search_locations: None,
            parent: parent_of(name, is_package).to_string(),
        }
    }

    /// Attach search locations; only packages carry them.
    pub fn with_search_prefix(mut self, path_prefix: Option<&str>) -> Self {
        if self.is_package {
            let locations = path_prefix
                .filter(|prefix| !prefix.is_empty())
                .map(|prefix| vec![prefix.to_string()])
                .unwrap_or_default();
            self.submodule_search_locations = Some(locations);
        }
        self
    }

    pub fn is_handled(&self) -> bool {
        self.loader == LoaderRef::Packed
    }
}

fn parent_of(name: &str, is_package: bool) -> &str {
    if is_package {
        return name;
    }
    name.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
}

/// Typed attributes of a created module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub name: String,
    pub package: String,
    pub file: String,
    pub loader: LoaderRef,
    pub path: Option<Vec<String>>,
}

impl ModuleRecord {
    /// Mirror a spec onto a new module.
    pub fn from_spec(spec: &ModuleSpec) -> Self {
        Self {
            name: spec.name.clone(),
            package: spec.parent.clone(),
            file: spec.origin.clone(),
            loader: spec.loader.clone(),
            path: spec.submodule_search_locations.clone(),
        }
    }

    pub fn is_package(&self) -> bool {
        self.path.is_some()
    }
}
