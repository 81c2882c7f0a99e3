//! Location of the running artifact

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use super::StorageError;

/// Path of the shared object or executable containing this loader.
///
/// Resolved through the dynamic loader on Unix, so a loader linked into a
/// shared library reports the library rather than the host executable.
#[cfg(unix)]
pub fn current_module_path() -> Result<PathBuf, StorageError> {
    use std::ffi::{CStr, OsStr};
    use std::os::unix::ffi::OsStrExt;

    let addr = current_module_path as *const () as *const libc::c_void;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe { libc::dladdr(addr, &mut info) };
    if found == 0 || info.dli_fname.is_null() {
        return Err(StorageError::Origin(
            "dynamic loader has no module for the loader's address".to_string(),
        ));
    }

    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    Ok(PathBuf::from(OsStr::from_bytes(name.to_bytes())))
}

#[cfg(not(unix))]
pub fn current_module_path() -> Result<PathBuf, StorageError> {
    std::env::current_exe().map_err(|e| StorageError::Origin(e.to_string()))
}

/// Directory part of `artifact`, rendered with a trailing separator.
///
/// A bare file name has no directory and renders as the empty string, which
/// keeps origins relative.
pub fn origin_directory(artifact: &Path) -> String {
    match artifact.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            let mut rendered = dir.to_string_lossy().into_owned();
            if !rendered.ends_with(MAIN_SEPARATOR) && !rendered.ends_with('/') {
                rendered.push(MAIN_SEPARATOR);
            }
            rendered
        }
        _ => String::new(),
    }
}
