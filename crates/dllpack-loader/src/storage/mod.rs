//! Storage backends
//!
//! A backend hands out the raw bytes of a resource, borrowed from memory the
//! artifact already owns. Which backend an artifact uses is fixed when it is
//! built:
//! - **section**: resources live between linker-provided boundary symbols
//! - **resource**: resources live in a table appended to the artifact file

pub mod origin;
pub mod resource;
pub mod section;

use std::path::PathBuf;

use thiserror::Error;

use crate::table::StorageKey;

pub use origin::{current_module_path, origin_directory};
pub use resource::ResourceStorage;
pub use section::{section_bounds, SectionStorage};

/// Storage failures, before a resource name is attached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// No bytes for this handle
    #[error("resource unavailable")]
    Unavailable,

    /// Platform failure, with its native error code when there is one
    #[error("{message}")]
    System { code: Option<i32>, message: String },

    /// The artifact's own path cannot be determined
    #[error("{0}")]
    Origin(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::System {
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

/// Retrieval of resource bytes from the artifact itself.
pub trait StorageBackend {
    /// Per-entry storage handle
    type Ref: StorageKey + 'static;

    /// Bytes of a code resource.
    fn fetch_code(&self, storage: Self::Ref) -> Result<&[u8], StorageError>;

    /// Bytes of a data resource.
    fn fetch_data(&self, storage: Self::Ref) -> Result<&[u8], StorageError>;

    /// Path of the artifact file.
    fn artifact_path(&self) -> Result<PathBuf, StorageError>;
}
