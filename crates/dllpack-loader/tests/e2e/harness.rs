//! Test harness for packed artifacts
//!
//! Builds artifact files with an appended payload, opens them through the
//! resource backend and runs them against a recording host runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dllpack_format::{CodeHeader, PayloadBuilder, RawEntry, RawTables};
use dllpack_loader::{
    encrypt_frame, ArtifactContext, AuditEvent, AuditHook, HostError, HostRuntime, LoaderError,
    ModuleRecord, PackConfig, ResourceStorage, CODE_RESOURCE_TYPE, DATA_RESOURCE_TYPE,
};

pub const KEY: &[u8; 32] = b"k3y-material-for-the-e2e-tests!!";

/// Code body that makes the mock host fail at execution time.
pub const RAISE: &str = "raise";

/// Prefix that makes the mock host reject code at unmarshal time.
pub const CORRUPT: &str = "\u{0}corrupt";

/// Install a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Host runtime whose code objects are the UTF-8 module bodies.
#[derive(Debug, Default)]
pub struct MockHost {
    pub executed: Vec<(String, String)>,
}

impl HostRuntime for MockHost {
    type Code = String;

    fn unmarshal(&self, bytes: &[u8]) -> Result<String, HostError> {
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|e| HostError::new(format!("bad marshal data: {}", e)))?;
        if body.starts_with(CORRUPT) {
            return Err(HostError::new("bad marshal data"));
        }
        Ok(body)
    }

    fn exec_code(&mut self, module: &ModuleRecord, code: &String) -> Result<(), HostError> {
        self.executed.push((module.name.clone(), code.clone()));
        if code == RAISE {
            return Err(HostError::new("ZeroDivisionError: division by zero"));
        }
        Ok(())
    }
}

impl MockHost {
    pub fn bodies(&self) -> Vec<&str> {
        self.executed.iter().map(|(_, code)| code.as_str()).collect()
    }
}

/// Audit hook that records every event and rejects the listed ones.
#[derive(Clone, Default)]
pub struct RecordingHook {
    pub events: Arc<Mutex<Vec<String>>>,
    pub deny: Vec<&'static str>,
}

impl RecordingHook {
    pub fn denying(event: &'static str) -> Self {
        Self {
            deny: vec![event],
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditHook for RecordingHook {
    fn audit(&self, _package: &str, event: &AuditEvent<'_>) -> Result<(), HostError> {
        let name = event.event_name();
        self.events.lock().unwrap().push(name.to_string());
        if self.deny.contains(&name) {
            return Err(HostError::new(format!("{} blocked by policy", name)));
        }
        Ok(())
    }
}

enum Resource {
    Code(String),
    Raw(Vec<u8>),
    Data(Vec<u8>),
}

/// Describes an artifact to pack.
pub struct ArtifactBuilder {
    module_name: String,
    next_id: u32,
    tables: RawTables,
    resources: Vec<(u32, Resource)>,
    bootstrap: Option<String>,
    key: Option<Vec<u8>>,
}

impl ArtifactBuilder {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            next_id: 1,
            tables: RawTables::default(),
            resources: Vec::new(),
            bootstrap: None,
            key: None,
        }
    }

    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// A module whose code is `body` behind a regular code header.
    pub fn module(mut self, name: &str, origin: &str, body: &str, is_package: bool) -> Self {
        let id = self.id();
        self.tables.imports.push(RawEntry::new(name, origin, id, is_package));
        self.resources.push((id, Resource::Code(body.to_string())));
        self
    }

    /// A module whose code resource is exactly `bytes`, header included.
    pub fn raw_module(mut self, name: &str, origin: &str, bytes: &[u8]) -> Self {
        let id = self.id();
        self.tables.imports.push(RawEntry::new(name, origin, id, false));
        self.resources.push((id, Resource::Raw(bytes.to_vec())));
        self
    }

    /// An import entry with no stored resource.
    pub fn missing_module(mut self, name: &str, origin: &str) -> Self {
        let id = self.id();
        self.tables.imports.push(RawEntry::new(name, origin, id, false));
        self
    }

    pub fn data(mut self, name: &str, origin: &str, bytes: &[u8]) -> Self {
        let id = self.id();
        self.tables.data.push(RawEntry::new(name, origin, id, false));
        self.resources.push((id, Resource::Data(bytes.to_vec())));
        self
    }

    pub fn redirect(mut self, name: &str, origin: &str) -> Self {
        self.tables.redirects.push(RawEntry::new(name, origin, 0, false));
        self
    }

    pub fn bootstrap(mut self, body: &str) -> Self {
        self.bootstrap = Some(body.to_string());
        self
    }

    pub fn encrypted(mut self, key: &[u8]) -> Self {
        self.key = Some(key.to_vec());
        self
    }

    fn seal(&self, id: u32, bytes: Vec<u8>) -> Vec<u8> {
        match &self.key {
            Some(key) => {
                let iv = [id as u8; 16];
                encrypt_frame(key, &iv, &bytes).unwrap()
            }
            None => bytes,
        }
    }

    /// Pack into an in-memory image behind a stub executable.
    pub fn image(mut self) -> Vec<u8> {
        let header = CodeHeader::unchecked(*b"TEST", 0);
        let mut builder = PayloadBuilder::new();

        if let Some(body) = self.bootstrap.take() {
            let id = self.id();
            self.resources.push((id, Resource::Code(body)));
            builder.bootstrap(id);
        }

        for (id, resource) in &self.resources {
            let (type_tag, bytes) = match resource {
                Resource::Code(body) => (CODE_RESOURCE_TYPE, header.frame(body.as_bytes())),
                Resource::Raw(bytes) => (CODE_RESOURCE_TYPE, bytes.clone()),
                Resource::Data(bytes) => (DATA_RESOURCE_TYPE, bytes.clone()),
            };
            builder.resource(type_tag, *id, self.seal(*id, bytes));
        }
        builder.tables(self.tables.clone());

        let mut image = b"\x7fELF packed artifact stub".to_vec();
        builder.append_to(&mut image).unwrap();
        image
    }

    /// Pack and write to `dir`, returning the artifact path.
    pub fn write(self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("lib{}.so", self.module_name));
        std::fs::write(&path, self.image()).unwrap();
        path
    }
}

/// Open an artifact file through the resource backend.
pub fn open(path: &Path, config: PackConfig) -> Result<ArtifactContext<ResourceStorage>, LoaderError> {
    let storage = ResourceStorage::open(path, &config)
        .map_err(|e| LoaderError::storage(path.display().to_string(), e))?;
    let tables = storage.tables(&config.module_name);
    ArtifactContext::init(config, tables, storage)
}

/// The standard fixture used across the e2e tests.
pub fn sample() -> ArtifactBuilder {
    ArtifactBuilder::new("pkg")
        .module("pkg", "pkg/__init__.py", "pkg init", true)
        .module("pkg.sub", "pkg/sub.py", "pkg.sub body", false)
        .module("pkg.tools", "pkg/tools/__init__.py", "tools init", true)
        .module("pkg.tools.fmt", "pkg/tools/fmt.py", "fmt body", false)
        .module("pkg.ns.deep", "pkg/ns/deep.py", "deep body", false)
        .data("pkg.template.txt", "pkg/template.txt", b"Hello, {name}!")
        .data("pkg.tools.table.csv", "pkg/tools/table.csv", b"a,b\n1,2\n")
        .redirect("pkg._speedups", "pkg/_speedups.cpython.so")
        .bootstrap("importer setup")
}
