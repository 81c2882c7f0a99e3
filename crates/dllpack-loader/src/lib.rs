//! Packed module loader
//!
//! Makes a single binary artifact behave as an importable package. The
//! artifact carries three entry tables and the resource bytes they point at;
//! this crate answers, for any dotted name, whether it exists, whether it is a
//! package and where its bytes are, then hands those bytes (decrypted if the
//! artifact was packed with a key) to the host runtime.
//!
//! - **table** / **resolver**: entry tables and name resolution
//! - **storage**: section-embedded and resource-table backends
//! - **crypto**: optional AES-CBC layer
//! - **code**: code and data loading
//! - **import** / **spec**: the import state machine and the records it builds
//! - **package**: the callback surface the host import system calls
//! - **context**: per-artifact state with explicit init and teardown

#![warn(rust_2018_idioms)]

pub mod code;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod host;
pub mod import;
pub mod package;
pub mod resolver;
pub mod spec;
pub mod storage;
pub mod table;

pub use code::{load_code, load_data};
pub use config::{ConfigError, PackConfig, CODE_RESOURCE_TYPE, DATA_RESOURCE_TYPE};
pub use context::ArtifactContext;
pub use crypto::{encrypt, encrypt_frame, CryptoError, Decryptor};
pub use error::{ErrorKind, LoaderError};
pub use host::{AuditEvent, AuditHook, HostError, HostRuntime};
pub use import::{ImportOperation, ImportState};
pub use package::{PackFinder, PackResourceReader, PackedPackage};
pub use resolver::{Match, Resolver};
pub use spec::{LoaderRef, ModuleRecord, ModuleSpec};
pub use storage::{ResourceStorage, SectionStorage, StorageBackend, StorageError};
pub use table::{Entry, EntryTable, PackTables, ResourceId, SectionAccessor, SectionRef, StorageKey};
