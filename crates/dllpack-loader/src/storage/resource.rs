//! Resource-table storage
//!
//! The artifact file carries an appended payload: resource blobs, a directory
//! keyed by `(type_tag, id)`, the entry tables and a trailer. The whole file is
//! read once when the storage is opened; fetches return views into it.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use dllpack_format::{PayloadError, PayloadIndex};
use tracing::{debug, trace};

use super::{StorageBackend, StorageError};
use crate::config::PackConfig;
use crate::table::{PackTables, ResourceId};

/// Backend for artifacts with an appended resource table.
#[derive(Debug)]
pub struct ResourceStorage {
    path: PathBuf,
    image: Vec<u8>,
    index: PayloadIndex,
    code_type: u16,
    data_type: u16,
}

impl ResourceStorage {
    /// Open the artifact at `path`.
    pub fn open(path: impl AsRef<Path>, config: &PackConfig) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let image = fs::read(path)?;
        Self::from_image(path, image, config)
    }

    /// Open the artifact containing the running loader.
    pub fn open_current(config: &PackConfig) -> Result<Self, StorageError> {
        let path = super::current_module_path()?;
        Self::open(path, config)
    }

    /// Use an artifact image already in memory.
    pub fn from_image(
        path: impl Into<PathBuf>,
        image: Vec<u8>,
        config: &PackConfig,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let index = PayloadIndex::parse(&image).map_err(payload_error)?;
        debug!(
            path = %path.display(),
            resources = index.len(),
            imports = index.tables.imports.len(),
            "opened resource table"
        );
        Ok(Self {
            path,
            image,
            index,
            code_type: config.code_resource_type,
            data_type: config.data_resource_type,
        })
    }

    /// Entry tables stored in the payload.
    pub fn tables(&self, module_name: &str) -> PackTables<ResourceId> {
        PackTables::from_raw(
            self.index.tables.clone(),
            self.index.trailer.bootstrap_id,
            module_name,
        )
    }

    fn fetch(&self, type_tag: u16, id: ResourceId) -> Result<&[u8], StorageError> {
        if id.0 == 0 {
            return Err(StorageError::Unavailable);
        }
        let Range { start, end } = self
            .index
            .range(type_tag, id.0)
            .ok_or(StorageError::Unavailable)?;
        let bytes = self.image.get(start..end).ok_or_else(|| StorageError::System {
            code: None,
            message: format!("resource {} lies outside the artifact", id),
        })?;
        trace!(type_tag, id = id.0, len = bytes.len(), "fetched resource");
        Ok(bytes)
    }
}

fn payload_error(err: PayloadError) -> StorageError {
    StorageError::System {
        code: None,
        message: err.to_string(),
    }
}

impl StorageBackend for ResourceStorage {
    type Ref = ResourceId;

    fn fetch_code(&self, storage: ResourceId) -> Result<&[u8], StorageError> {
        self.fetch(self.code_type, storage)
    }

    fn fetch_data(&self, storage: ResourceId) -> Result<&[u8], StorageError> {
        self.fetch(self.data_type, storage)
    }

    fn artifact_path(&self) -> Result<PathBuf, StorageError> {
        Ok(self.path.clone())
    }
}
