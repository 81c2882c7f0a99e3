//! Import state machine
//!
//! ```text
//! Requested -> Resolved -> SpecBuilt -> ModuleCreated -> Executing -> Done
//!      \___________\___________\______________\____________\-> Failed(kind)
//! ```
//!
//! Each step checks the current state, so calling steps out of order is an
//! `InvalidTransition` error rather than undefined behaviour.

use std::fmt;

use tracing::debug;

use crate::code::load_code;
use crate::context::ArtifactContext;
use crate::error::{ErrorKind, LoaderError};
use crate::host::{AuditEvent, HostRuntime};
use crate::resolver::Match;
use crate::spec::{LoaderRef, ModuleRecord, ModuleSpec};
use crate::storage::StorageBackend;
use crate::table::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Requested,
    Resolved,
    SpecBuilt,
    ModuleCreated,
    Executing,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportState::Failed(kind) => write!(f, "Failed({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// What a name resolved to.
enum Target<'c, R> {
    Module(Match<'c, R>),
    Redirect(&'c Entry<R>),
}

impl<R> Clone for Target<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Target<'_, R> {}

/// One import of one name from an artifact.
pub struct ImportOperation<'c, S: StorageBackend> {
    ctx: &'c ArtifactContext<S>,
    name: String,
    state: ImportState,
    target: Option<Target<'c, S::Ref>>,
    spec: Option<ModuleSpec>,
    module: Option<ModuleRecord>,
}

impl<'c, S: StorageBackend> ImportOperation<'c, S> {
    pub fn new(ctx: &'c ArtifactContext<S>, name: impl Into<String>) -> Self {
        Self {
            ctx,
            name: name.into(),
            state: ImportState::Requested,
            target: None,
            spec: None,
            module: None,
        }
    }

    /// Pick up a module the host already created, ready to execute.
    pub fn resume(ctx: &'c ArtifactContext<S>, module: ModuleRecord) -> Result<Self, LoaderError> {
        let mut op = Self::new(ctx, module.name.clone());
        op.resolve()?;
        op.module = Some(module);
        op.state = ImportState::ModuleCreated;
        Ok(op)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn spec(&self) -> Option<&ModuleSpec> {
        self.spec.as_ref()
    }

    pub fn module(&self) -> Option<&ModuleRecord> {
        self.module.as_ref()
    }

    pub fn into_module(self) -> Option<ModuleRecord> {
        self.module
    }

    /// `Requested -> Resolved`: look the name up in the import table, then
    /// the redirect table.
    pub fn resolve(&mut self) -> Result<(), LoaderError> {
        self.expect(ImportState::Requested, "resolve")?;
        let result = self.lookup();
        let target = self.advance(result, ImportState::Resolved)?;
        self.target = Some(target);
        Ok(())
    }

    /// `Resolved -> SpecBuilt`.
    pub fn build_spec(&mut self, path_prefix: Option<&str>) -> Result<&ModuleSpec, LoaderError> {
        self.expect(ImportState::Resolved, "build a spec")?;
        let result = self.make_spec(path_prefix);
        let spec = self.advance(result, ImportState::SpecBuilt)?;
        Ok(self.spec.insert(spec))
    }

    /// `SpecBuilt -> ModuleCreated`.
    pub fn create_module(&mut self) -> Result<&ModuleRecord, LoaderError> {
        self.expect(ImportState::SpecBuilt, "create a module")?;
        let record = match &self.spec {
            Some(spec) => ModuleRecord::from_spec(spec),
            None => return Err(self.invalid("create a module")),
        };
        self.state = ImportState::ModuleCreated;
        Ok(self.module.insert(record))
    }

    /// `ModuleCreated -> Executing -> Done`.
    ///
    /// With `as_main`, the importer-setup code runs first if this context has
    /// not run it yet.
    pub fn execute<H>(&mut self, host: &mut H, as_main: bool) -> Result<(), LoaderError>
    where
        H: HostRuntime + ?Sized,
    {
        self.expect(ImportState::ModuleCreated, "execute")?;
        self.state = ImportState::Executing;
        debug!(name = %self.name, as_main, "executing module");
        let result = self.run(host, as_main);
        self.advance(result, ImportState::Done)
    }

    fn lookup(&self) -> Result<Target<'c, S::Ref>, LoaderError> {
        let ctx = self.ctx;
        ctx.audit(&self.name, &AuditEvent::LookupImport { name: &self.name })?;
        let found = ctx.resolver().resolve(&self.name);
        if found.is_found() {
            return Ok(Target::Module(found));
        }

        ctx.audit(&self.name, &AuditEvent::LookupRedirect { name: &self.name })?;
        match ctx.resolver().redirect(&self.name) {
            Some(entry) => Ok(Target::Redirect(entry)),
            None => Err(LoaderError::ModuleNotFound {
                name: self.name.clone(),
            }),
        }
    }

    fn make_spec(&self, path_prefix: Option<&str>) -> Result<ModuleSpec, LoaderError> {
        let target = self.target.ok_or_else(|| self.invalid("build a spec"))?;
        self.ctx
            .audit(&self.name, &AuditEvent::MakeSpec { name: &self.name })?;

        let (relative, loader, is_package) = match target {
            Target::Module(found) => {
                let relative = found.entry().map_or(self.name.as_str(), |e| &*e.origin);
                (relative, LoaderRef::Packed, found.is_package())
            }
            Target::Redirect(entry) => (&*entry.origin, LoaderRef::NotHandled, false),
        };
        let origin = self.ctx.origin_for(relative)?;

        let spec = ModuleSpec::new(&self.name, origin, loader, is_package)
            .with_search_prefix(path_prefix);
        debug!(name = %spec.name, origin = %spec.origin, is_package, "built spec");
        Ok(spec)
    }

    fn run<H>(&self, host: &mut H, as_main: bool) -> Result<(), LoaderError>
    where
        H: HostRuntime + ?Sized,
    {
        let module = self.module.as_ref().ok_or_else(|| self.invalid("execute"))?;
        let entry = match self.target {
            Some(Target::Module(found)) => found.entry(),
            _ => {
                return Err(LoaderError::ModuleNotFound {
                    name: self.name.clone(),
                })
            }
        };

        if as_main && self.ctx.begin_bootstrap() {
            if let Some(bootstrap) = &self.ctx.tables().bootstrap {
                debug!(name = %module.name, "running importer setup");
                let code = load_code(self.ctx, &*host, bootstrap)?;
                host.exec_code(module, &code)
                    .map_err(|source| LoaderError::Execution {
                        name: module.name.clone(),
                        source,
                    })?;
            }
        }

        // Implied packages carry no code of their own
        let Some(entry) = entry else {
            return Ok(());
        };
        let code = load_code(self.ctx, &*host, entry)?;
        host.exec_code(module, &code)
            .map_err(|source| LoaderError::Execution {
                name: module.name.clone(),
                source,
            })
    }

    fn expect(&self, expected: ImportState, step: &'static str) -> Result<(), LoaderError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(step))
        }
    }

    fn invalid(&self, step: &'static str) -> LoaderError {
        LoaderError::InvalidTransition {
            name: self.name.clone(),
            step,
            state: self.state.to_string(),
        }
    }

    fn advance<T>(&mut self, result: Result<T, LoaderError>, next: ImportState) -> Result<T, LoaderError> {
        match result {
            Ok(value) => {
                debug!(name = %self.name, from = %self.state, to = %next, "import transition");
                self.state = next;
                Ok(value)
            }
            Err(err) => {
                debug!(name = %self.name, from = %self.state, error = %err, "import failed");
                self.state = ImportState::Failed(err.kind());
                Err(err)
            }
        }
    }
}
