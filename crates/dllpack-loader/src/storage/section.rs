//! Section-embedded storage
//!
//! Each resource is the byte range between two symbols the linker places
//! around it. The generated accessor for a resource usually looks like:
//!
//! ```ignore
//! extern "C" {
//!     static __dllpack_start_pkg_sub: u8;
//!     static __dllpack_end_pkg_sub: u8;
//! }
//!
//! fn pkg_sub() -> Option<&'static [u8]> {
//!     unsafe { section_bounds(&__dllpack_start_pkg_sub, &__dllpack_end_pkg_sub) }
//! }
//! ```

use std::path::PathBuf;

use tracing::trace;

use super::{origin, StorageBackend, StorageError};
use crate::table::SectionRef;

/// Backend for artifacts whose resources are linked into their own sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionStorage;

impl SectionStorage {
    pub fn new() -> Self {
        SectionStorage
    }

    fn fetch(&self, storage: SectionRef) -> Result<&'static [u8], StorageError> {
        let accessor = storage.ok_or(StorageError::Unavailable)?;
        let bytes = accessor().ok_or(StorageError::Unavailable)?;
        trace!(len = bytes.len(), "fetched section resource");
        Ok(bytes)
    }
}

impl StorageBackend for SectionStorage {
    type Ref = SectionRef;

    fn fetch_code(&self, storage: SectionRef) -> Result<&[u8], StorageError> {
        self.fetch(storage)
    }

    fn fetch_data(&self, storage: SectionRef) -> Result<&[u8], StorageError> {
        self.fetch(storage)
    }

    fn artifact_path(&self) -> Result<PathBuf, StorageError> {
        origin::current_module_path()
    }
}

/// View the bytes between two boundary symbols.
///
/// Returns `None` when either boundary is unresolved (null) or the end lies
/// before the start.
///
/// # Safety
/// Both pointers must come from the same loaded section, and the range
/// between them must stay mapped and unmodified for the rest of the process.
pub unsafe fn section_bounds(start: *const u8, end: *const u8) -> Option<&'static [u8]> {
    if start.is_null() || end.is_null() || (end as usize) < (start as usize) {
        return None;
    }
    let len = end as usize - start as usize;
    Some(std::slice::from_raw_parts(start, len))
}
