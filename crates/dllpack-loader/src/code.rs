//! Code and data loading

use dllpack_format::strip_code_header;
use tracing::trace;

use crate::context::ArtifactContext;
use crate::error::LoaderError;
use crate::host::{AuditEvent, HostRuntime};
use crate::storage::StorageBackend;
use crate::table::Entry;

/// Fetch, decrypt and unmarshal the code of `entry`.
///
/// Buffers shorter than the code header fail with `TruncatedModule` before
/// the host ever sees them.
pub fn load_code<S, H>(
    ctx: &ArtifactContext<S>,
    host: &H,
    entry: &Entry<S::Ref>,
) -> Result<H::Code, LoaderError>
where
    S: StorageBackend,
    H: HostRuntime + ?Sized,
{
    ctx.audit(&entry.name, &AuditEvent::LoadCode { origin: &entry.origin })?;

    let bytes = ctx.read_code(entry)?;
    let header_len = ctx.config().code_header_len;
    let code = strip_code_header(&bytes, header_len).ok_or_else(|| LoaderError::TruncatedModule {
        name: entry.name.to_string(),
        len: bytes.len(),
        header_len,
    })?;
    trace!(name = %entry.name, len = code.len(), "unmarshalling code");

    host.unmarshal(code)
        .map_err(|source| LoaderError::Deserialize {
            name: entry.name.to_string(),
            source,
        })
}

/// Fetch and decrypt the bytes of a data entry.
pub fn load_data<S: StorageBackend>(
    ctx: &ArtifactContext<S>,
    entry: &Entry<S::Ref>,
) -> Result<Vec<u8>, LoaderError> {
    ctx.audit(&entry.name, &AuditEvent::LoadBytes { origin: &entry.origin })?;
    Ok(ctx.read_data(entry)?.into_owned())
}
