//! Host runtime boundary
//!
//! The loader never interprets code itself. A [`HostRuntime`] turns stripped
//! code bytes into its own code objects and runs them; an [`AuditHook`] may
//! veto loader operations before they happen.

use std::fmt;

use crate::spec::ModuleRecord;

/// An error reported by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The interpreter the packed modules run on.
pub trait HostRuntime {
    /// Unmarshalled code unit
    type Code;

    /// Deserialize marshalled code (header already stripped).
    fn unmarshal(&self, bytes: &[u8]) -> Result<Self::Code, HostError>;

    /// Run `code` in the namespace of `module`.
    fn exec_code(&mut self, module: &ModuleRecord, code: &Self::Code) -> Result<(), HostError>;
}

/// Loader operations reported to the audit hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent<'a> {
    LookupImport { name: &'a str },
    LookupData { name: &'a str },
    LookupRedirect { name: &'a str },
    MakeSpec { name: &'a str },
    GetOriginRoot,
    LoadBytes { origin: &'a str },
    LoadCode { origin: &'a str },
    DecryptBuffer {
        cipher_length: usize,
        plain_length: u32,
        iv_length: usize,
    },
    ModuleNames { prefix: &'a str },
    DataNames,
}

impl AuditEvent<'_> {
    /// Stable event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            AuditEvent::LookupImport { .. } => "dllpack.lookup_import",
            AuditEvent::LookupData { .. } => "dllpack.lookup_data",
            AuditEvent::LookupRedirect { .. } => "dllpack.lookup_redirect",
            AuditEvent::MakeSpec { .. } => "dllpack.makespec",
            AuditEvent::GetOriginRoot => "dllpack.get_origin_root",
            AuditEvent::LoadBytes { .. } => "dllpack.load_bytes",
            AuditEvent::LoadCode { .. } => "dllpack.load_code",
            AuditEvent::DecryptBuffer { .. } => "dllpack.decrypt_buffer",
            AuditEvent::ModuleNames { .. } => "dllpack.module_names",
            AuditEvent::DataNames => "dllpack.data_names",
        }
    }
}

impl fmt::Display for AuditEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Receives every [`AuditEvent`] before the operation runs.
pub trait AuditHook: Send + Sync {
    /// Return an error to veto the operation.
    fn audit(&self, package: &str, event: &AuditEvent<'_>) -> Result<(), HostError>;
}

impl<F> AuditHook for F
where
    F: Fn(&str, &AuditEvent<'_>) -> Result<(), HostError> + Send + Sync,
{
    fn audit(&self, package: &str, event: &AuditEvent<'_>) -> Result<(), HostError> {
        self(package, event)
    }
}
