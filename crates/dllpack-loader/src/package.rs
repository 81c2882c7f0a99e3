//! Host callback surface
//!
//! [`PackedPackage`] is what the host import system talks to: it builds specs,
//! creates and executes modules, and serves data resources and listings.
//! [`PackFinder`] and [`PackResourceReader`] sit on top of it as the meta-path
//! finder and per-package resource reader the importer-setup code installs.

use tracing::debug;

use crate::code::load_data;
use crate::context::ArtifactContext;
use crate::error::{ErrorKind, LoaderError};
use crate::host::{AuditEvent, HostRuntime};
use crate::import::ImportOperation;
use crate::spec::{LoaderRef, ModuleRecord, ModuleSpec};
use crate::storage::StorageBackend;

/// The package an artifact provides.
pub struct PackedPackage<'c, S: StorageBackend> {
    ctx: &'c ArtifactContext<S>,
}

impl<S: StorageBackend> Clone for PackedPackage<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: StorageBackend> Copy for PackedPackage<'_, S> {}

impl<'c, S: StorageBackend> PackedPackage<'c, S> {
    pub fn new(ctx: &'c ArtifactContext<S>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &'c ArtifactContext<S> {
        self.ctx
    }

    /// Package display name.
    pub fn name(&self) -> &'c str {
        self.ctx.name()
    }

    /// Build a spec for `fullname`, or `None` when the artifact has no such
    /// module.
    pub fn make_spec(
        &self,
        fullname: &str,
        path_prefix: Option<&str>,
    ) -> Result<Option<ModuleSpec>, LoaderError> {
        let mut op = ImportOperation::new(self.ctx, fullname);
        match op.resolve() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::ModuleNotFound => return Ok(None),
            Err(err) => return Err(err),
        }
        op.build_spec(path_prefix).map(|spec| Some(spec.clone()))
    }

    /// Create the bare module for a spec.
    pub fn create_module(&self, spec: &ModuleSpec) -> ModuleRecord {
        ModuleRecord::from_spec(spec)
    }

    /// Execute a module the host created from one of our specs.
    pub fn exec_module<H>(&self, host: &mut H, module: &ModuleRecord) -> Result<(), LoaderError>
    where
        H: HostRuntime + ?Sized,
    {
        ImportOperation::resume(self.ctx, module.clone())?.execute(host, false)
    }

    /// Run one import from request to execution.
    pub fn import_module<H>(
        &self,
        host: &mut H,
        fullname: &str,
        path_prefix: Option<&str>,
        as_main: bool,
    ) -> Result<ModuleRecord, LoaderError>
    where
        H: HostRuntime + ?Sized,
    {
        let mut op = ImportOperation::new(self.ctx, fullname);
        op.resolve()?;
        op.build_spec(path_prefix)?;
        op.create_module()?;
        op.execute(host, as_main)?;
        op.into_module().ok_or_else(|| LoaderError::ModuleNotFound {
            name: fullname.to_string(),
        })
    }

    /// Artifact entry point: execute the package itself as the main module.
    ///
    /// The first call also runs the importer-setup code.
    pub fn exec_main<H>(&self, host: &mut H, path_prefix: Option<&str>) -> Result<ModuleRecord, LoaderError>
    where
        H: HostRuntime + ?Sized,
    {
        debug!(package = self.name(), "executing artifact entry point");
        self.import_module(host, self.name(), path_prefix, true)
    }

    /// Names of all data resources.
    pub fn data_names(&self) -> Result<Vec<String>, LoaderError> {
        self.ctx.audit(self.name(), &AuditEvent::DataNames)?;
        Ok(self.ctx.resolver().data_names())
    }

    /// Bytes of the data resource `name`.
    pub fn data(&self, name: &str) -> Result<Vec<u8>, LoaderError> {
        self.ctx.audit(name, &AuditEvent::LookupData { name })?;
        let entry = self
            .ctx
            .resolver()
            .data(name)
            .ok_or_else(|| LoaderError::ResourceUnavailable {
                name: name.to_string(),
            })?;
        load_data(self.ctx, entry)
    }

    /// Direct submodules of `prefix` as `(leaf, is_package)`.
    pub fn module_names(&self, prefix: &str) -> Result<Vec<(String, bool)>, LoaderError> {
        self.ctx.audit(prefix, &AuditEvent::ModuleNames { prefix })?;
        Ok(self.ctx.resolver().module_names(prefix))
    }

    pub fn finder(&self) -> PackFinder<'c, S> {
        PackFinder { package: *self }
    }
}

/// Meta-path finder limited to the package's own namespace.
pub struct PackFinder<'c, S: StorageBackend> {
    package: PackedPackage<'c, S>,
}

impl<'c, S: StorageBackend> PackFinder<'c, S> {
    fn owns(&self, fullname: &str) -> bool {
        let name = self.package.name();
        fullname == name
            || fullname
                .strip_prefix(name)
                .map_or(false, |rest| rest.starts_with('.'))
    }

    /// Spec for `fullname` if it belongs to this package.
    ///
    /// Redirects come back with [`LoaderRef::External`] so the host loads the
    /// named file with its native extension loader.
    pub fn find_spec(
        &self,
        fullname: &str,
        path_prefix: Option<&str>,
    ) -> Result<Option<ModuleSpec>, LoaderError> {
        if !self.owns(fullname) {
            return Ok(None);
        }
        let spec = self.package.make_spec(fullname, path_prefix)?;
        Ok(spec.map(|mut spec| {
            if spec.loader == LoaderRef::NotHandled {
                spec.loader = LoaderRef::External {
                    name: spec.name.clone(),
                    origin: spec.origin.clone(),
                };
            }
            spec
        }))
    }

    /// Resource reader for a package; `None` for leaf modules and unknown names.
    pub fn resource_reader(&self, fullname: &str) -> Option<PackResourceReader<'c, S>> {
        let spec = self.package.make_spec(fullname, None).ok()??;
        if !spec.is_package {
            return None;
        }
        let names = self.package.data_names().ok()?;
        Some(PackResourceReader {
            package: self.package,
            prefix: format!("{}.", fullname),
            names,
        })
    }
}

/// Data resources of one package.
pub struct PackResourceReader<'c, S: StorageBackend> {
    package: PackedPackage<'c, S>,
    prefix: String,
    names: Vec<String>,
}

impl<'c, S: StorageBackend> PackResourceReader<'c, S> {
    pub fn open_resource(&self, resource: &str) -> Result<Vec<u8>, LoaderError> {
        self.package.data(&format!("{}{}", self.prefix, resource))
    }

    pub fn is_resource(&self, resource: &str) -> bool {
        let full = format!("{}{}", self.prefix, resource);
        self.names.iter().any(|name| *name == full)
    }

    /// Resource names under this package, without the package prefix.
    pub fn contents(&self) -> Vec<String> {
        self.names
            .iter()
            .filter_map(|name| name.strip_prefix(self.prefix.as_str()))
            .map(str::to_string)
            .collect()
    }
}
