//! Per-artifact loader state
//!
//! An [`ArtifactContext`] is created once, when the artifact starts
//! executing, and owns everything the loader needs afterwards: the tables,
//! the storage backend, the decryption key and the cached origin directory.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::PackConfig;
use crate::crypto::Decryptor;
use crate::error::{ErrorKind, LoaderError};
use crate::host::{AuditEvent, AuditHook};
use crate::resolver::Resolver;
use crate::storage::{origin_directory, StorageBackend};
use crate::table::{Entry, PackTables};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Code,
    Data,
}

pub struct ArtifactContext<S: StorageBackend> {
    config: PackConfig,
    tables: PackTables<S::Ref>,
    storage: S,
    decryptor: Option<Decryptor>,
    audit_hook: Option<Box<dyn AuditHook>>,
    origin_root: OnceCell<String>,
    bootstrapped: AtomicBool,
}

impl<S: StorageBackend> ArtifactContext<S> {
    /// Validate the config and tables and acquire the decryption key.
    ///
    /// When the config names a key variable, the variable is read and
    /// removed from the environment here, exactly once.
    pub fn init(
        config: PackConfig,
        tables: PackTables<S::Ref>,
        storage: S,
    ) -> Result<Self, LoaderError> {
        config.validate()?;
        tables.validate()?;

        let decryptor = match &config.encrypt_key_variable {
            Some(variable) => Some(
                Decryptor::from_env(variable, config.max_iv_len)
                    .map_err(|e| LoaderError::crypto(config.module_name.as_str(), e))?,
            ),
            None => None,
        };

        debug!(
            package = %config.module_name,
            imports = tables.imports.len(),
            data = tables.data.len(),
            redirects = tables.redirects.len(),
            encrypted = decryptor.is_some(),
            "artifact context initialized"
        );

        Ok(Self {
            config,
            tables,
            storage,
            decryptor,
            audit_hook: None,
            origin_root: OnceCell::new(),
            bootstrapped: AtomicBool::new(false),
        })
    }

    /// Install a hook that sees every loader operation first.
    pub fn with_audit_hook(mut self, hook: impl AuditHook + 'static) -> Self {
        self.audit_hook = Some(Box::new(hook));
        self
    }

    /// Release the decryption key and everything else the context owns.
    pub fn teardown(mut self) {
        self.decryptor.take();
        debug!(package = %self.config.module_name, "artifact context torn down");
    }

    /// Display name of the package.
    pub fn name(&self) -> &str {
        &self.config.module_name
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    pub fn tables(&self) -> &PackTables<S::Ref> {
        &self.tables
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn resolver(&self) -> Resolver<'_, S::Ref> {
        Resolver::new(&self.tables)
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Report `event` on `subject` to the audit hook.
    pub fn audit(&self, subject: &str, event: &AuditEvent<'_>) -> Result<(), LoaderError> {
        let Some(hook) = &self.audit_hook else {
            return Ok(());
        };
        hook.audit(&self.config.module_name, event)
            .map_err(|source| LoaderError::AuditRejected {
                event: event.event_name(),
                name: subject.to_string(),
                source,
            })
    }

    /// Directory containing the artifact, with a trailing separator.
    ///
    /// Computed on first use and cached; failures are not cached.
    pub fn origin_root(&self) -> Result<&str, LoaderError> {
        self.origin_root
            .get_or_try_init(|| -> Result<String, LoaderError> {
                self.audit(self.name(), &AuditEvent::GetOriginRoot)?;
                let path = self
                    .storage
                    .artifact_path()
                    .map_err(|e| LoaderError::storage(self.name(), e))?;
                let root = origin_directory(&path);
                debug!(root = %root, "resolved artifact origin");
                Ok(root)
            })
            .map(String::as_str)
    }

    /// Origin directory joined with `relative`, or `relative` alone when the
    /// artifact cannot locate itself.
    pub fn origin_for(&self, relative: &str) -> Result<String, LoaderError> {
        match self.origin_root() {
            Ok(root) => Ok(format!("{}{}", root, relative)),
            Err(err) if err.kind() == ErrorKind::AuditRejected => Err(err),
            Err(err) => {
                warn!(origin = relative, error = %err, "using relative origin");
                Ok(relative.to_string())
            }
        }
    }

    /// Plaintext bytes of a code resource.
    pub fn read_code(&self, entry: &Entry<S::Ref>) -> Result<Cow<'_, [u8]>, LoaderError> {
        self.read(entry, Bucket::Code)
    }

    /// Plaintext bytes of a data resource.
    pub fn read_data(&self, entry: &Entry<S::Ref>) -> Result<Cow<'_, [u8]>, LoaderError> {
        self.read(entry, Bucket::Data)
    }

    fn read(&self, entry: &Entry<S::Ref>, bucket: Bucket) -> Result<Cow<'_, [u8]>, LoaderError> {
        let raw = match bucket {
            Bucket::Code => self.storage.fetch_code(entry.storage),
            Bucket::Data => self.storage.fetch_data(entry.storage),
        }
        .map_err(|e| LoaderError::storage(&*entry.name, e))?;

        let Some(decryptor) = &self.decryptor else {
            return Ok(Cow::Borrowed(raw));
        };

        let crypto_err = |e| LoaderError::crypto(&*entry.name, e);
        let frame = decryptor.parse_frame(raw).map_err(crypto_err)?;
        self.audit(
            &entry.name,
            &AuditEvent::DecryptBuffer {
                cipher_length: frame.ciphertext.len(),
                plain_length: frame.plain_length,
                iv_length: frame.iv.len(),
            },
        )?;
        let plain = decryptor.decrypt_frame(&frame).map_err(crypto_err)?;
        Ok(Cow::Owned(plain))
    }

    /// Claim the one-time bootstrap run. True only for the first caller.
    pub(crate) fn begin_bootstrap(&self) -> bool {
        !self.bootstrapped.swap(true, Ordering::AcqRel)
    }
}
