//! Appended resource payload
//!
//! Defines the resource table attached to the end of a packed artifact.
//!
//! ```text
//! ┌─────────────────────────┐
//! │  artifact (unchanged)   │  ← shared object or executable
//! ├─────────────────────────┤
//! │  Resource blobs         │  ← code and data resources, back to back
//! ├─────────────────────────┤
//! │  Directory              │  ← array of DirectoryEntry
//! ├─────────────────────────┤
//! │  Tables                 │  ← imports, data, redirects (sentinel-terminated)
//! ├─────────────────────────┤
//! │  Trailer                │  ← fixed-size, at very end of file
//! └─────────────────────────┘
//! ```
//!
//! Offsets in the trailer and directory are relative to the payload start.

use std::collections::HashMap;
use std::io::{self, Write};
use std::ops::Range;

use thiserror::Error;

use crate::encoder::{ByteReader, ByteWriter, DecodeError, EncodeError};
use crate::table::RawTables;

/// Magic bytes identifying a packed-resource trailer.
pub const TRAILER_MAGIC: [u8; 8] = *b"DLLPACK\0";

/// Size of the trailer in bytes.
pub const TRAILER_SIZE: usize = 8 + 8 + 4 + 8 + 8 + 4 + 4 + 4 + 8;

/// Size of one directory entry in bytes.
pub const DIRECTORY_ENTRY_SIZE: usize = 2 + 4 + 8 + 8;

/// Errors reading an appended payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// No trailer at the end of the artifact
    #[error("artifact has no packed-resource trailer")]
    NoTrailer,

    /// An offset or size points outside the artifact
    #[error("corrupt payload layout: {0}")]
    Layout(String),

    /// Payload bytes do not match the recorded checksum
    #[error("payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Directory or tables failed to decode
    #[error("payload decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Fixed-size trailer at the very end of a packed artifact.
///
/// To detect a payload, read the last `TRAILER_SIZE` bytes and check the
/// magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Magic bytes: b"DLLPACK\0"
    pub magic: [u8; 8],

    /// Offset of the resource directory.
    pub directory_offset: u64,

    /// Number of directory entries.
    pub directory_count: u32,

    /// Offset of the tables section.
    pub tables_offset: u64,

    /// Size of the tables section in bytes.
    pub tables_size: u64,

    /// Code resource id of the importer-setup module; zero when absent.
    pub bootstrap_id: u32,

    /// CRC32 checksum of the payload (everything before the trailer).
    pub checksum: u32,

    /// Size of this trailer (for forward compatibility).
    pub trailer_size: u32,

    /// Offset from the start of the file to the start of the payload.
    /// This equals the size of the original artifact.
    pub payload_offset: u64,
}

impl Trailer {
    /// Check if this trailer has the correct magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == TRAILER_MAGIC
    }

    /// Read a trailer from exactly `TRAILER_SIZE` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut reader = ByteReader::new(bytes);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(reader.read_slice(8).ok()?);
        let trailer = Self {
            magic,
            directory_offset: reader.read_u64().ok()?,
            directory_count: reader.read_u32().ok()?,
            tables_offset: reader.read_u64().ok()?,
            tables_size: reader.read_u64().ok()?,
            bootstrap_id: reader.read_u32().ok()?,
            checksum: reader.read_u32().ok()?,
            trailer_size: reader.read_u32().ok()?,
            payload_offset: reader.read_u64().ok()?,
        };
        trailer.is_valid().then_some(trailer)
    }

    /// Write the trailer to a byte buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(TRAILER_SIZE);
        writer.emit_bytes(&self.magic);
        writer.emit_u64(self.directory_offset);
        writer.emit_u32(self.directory_count);
        writer.emit_u64(self.tables_offset);
        writer.emit_u64(self.tables_size);
        writer.emit_u32(self.bootstrap_id);
        writer.emit_u32(self.checksum);
        writer.emit_u32(self.trailer_size);
        writer.emit_u64(self.payload_offset);
        writer.into_bytes()
    }
}

/// Entry in the resource directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Resource bucket (code or data)
    pub type_tag: u16,
    /// Resource id, unique within its bucket
    pub id: u32,
    /// Offset of the blob from the payload start
    pub offset: u64,
    /// Blob size in bytes
    pub size: u64,
}

impl DirectoryEntry {
    fn write(&self, writer: &mut ByteWriter) {
        writer.emit_u16(self.type_tag);
        writer.emit_u32(self.id);
        writer.emit_u64(self.offset);
        writer.emit_u64(self.size);
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            type_tag: reader.read_u16()?,
            id: reader.read_u32()?,
            offset: reader.read_u64()?,
            size: reader.read_u64()?,
        })
    }
}

/// Builds a payload to append to an artifact.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    resources: Vec<(u16, u32, Vec<u8>)>,
    tables: RawTables,
    bootstrap_id: u32,
}

impl PayloadBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource blob under `(type_tag, id)`.
    pub fn resource(&mut self, type_tag: u16, id: u32, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.resources.push((type_tag, id, bytes.into()));
        self
    }

    /// Set the entry tables.
    pub fn tables(&mut self, tables: RawTables) -> &mut Self {
        self.tables = tables;
        self
    }

    /// Set the code resource id of the importer-setup module.
    pub fn bootstrap(&mut self, id: u32) -> &mut Self {
        self.bootstrap_id = id;
        self
    }

    /// Encode the payload, trailer included.
    ///
    /// `payload_offset` is the size of the artifact the payload will be
    /// appended to.
    pub fn build(&self, payload_offset: u64) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::new();
        let mut directory = Vec::with_capacity(self.resources.len());

        for (type_tag, id, bytes) in &self.resources {
            directory.push(DirectoryEntry {
                type_tag: *type_tag,
                id: *id,
                offset: writer.offset() as u64,
                size: bytes.len() as u64,
            });
            writer.emit_bytes(bytes);
        }

        let directory_offset = writer.offset() as u64;
        for entry in &directory {
            entry.write(&mut writer);
        }

        let tables_offset = writer.offset() as u64;
        writer.emit_bytes(&self.tables.encode()?);
        let tables_size = writer.offset() as u64 - tables_offset;

        let mut payload = writer.into_bytes();
        let trailer = Trailer {
            magic: TRAILER_MAGIC,
            directory_offset,
            directory_count: u32::try_from(directory.len())
                .map_err(|_| EncodeError::LengthOverflow(directory.len()))?,
            tables_offset,
            tables_size,
            bootstrap_id: self.bootstrap_id,
            checksum: crc32fast::hash(&payload),
            trailer_size: TRAILER_SIZE as u32,
            payload_offset,
        };
        payload.extend_from_slice(&trailer.to_bytes());
        Ok(payload)
    }

    /// Append the payload to an artifact image.
    pub fn append_to(&self, artifact: &mut Vec<u8>) -> Result<(), EncodeError> {
        let payload = self.build(artifact.len() as u64)?;
        artifact.extend_from_slice(&payload);
        Ok(())
    }

    /// Write the payload after an artifact of `artifact_len` bytes.
    pub fn write_to<W: Write>(&self, writer: &mut W, artifact_len: u64) -> io::Result<()> {
        let payload = self
            .build(artifact_len)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        writer.write_all(&payload)
    }
}

/// Location of every resource in a loaded artifact image.
///
/// Ranges are absolute offsets into the artifact bytes, so the index can be
/// kept next to the buffer it describes.
#[derive(Debug, Clone)]
pub struct PayloadIndex {
    /// The trailer read from the artifact
    pub trailer: Trailer,
    /// Entry tables
    pub tables: RawTables,
    resources: HashMap<(u16, u32), Range<usize>>,
}

impl PayloadIndex {
    /// Locate and validate the payload at the end of `artifact`.
    pub fn parse(artifact: &[u8]) -> Result<Self, PayloadError> {
        if artifact.len() < TRAILER_SIZE {
            return Err(PayloadError::NoTrailer);
        }

        // Read trailer from the end
        let trailer_start = artifact.len() - TRAILER_SIZE;
        let trailer =
            Trailer::from_bytes(&artifact[trailer_start..]).ok_or(PayloadError::NoTrailer)?;

        let payload_start = usize::try_from(trailer.payload_offset)
            .ok()
            .filter(|&start| start <= trailer_start)
            .ok_or_else(|| {
                PayloadError::Layout(format!(
                    "payload offset {} is past the trailer",
                    trailer.payload_offset
                ))
            })?;
        let payload = &artifact[payload_start..trailer_start];

        let actual = crc32fast::hash(payload);
        if actual != trailer.checksum {
            return Err(PayloadError::ChecksumMismatch {
                expected: trailer.checksum,
                actual,
            });
        }

        let directory_bytes = section(
            payload,
            trailer.directory_offset,
            trailer.directory_count as u64 * DIRECTORY_ENTRY_SIZE as u64,
            "directory",
        )?;
        let mut reader = ByteReader::new(directory_bytes);
        let mut resources = HashMap::with_capacity(trailer.directory_count as usize);
        for _ in 0..trailer.directory_count {
            let entry = DirectoryEntry::read(&mut reader)?;
            section(payload, entry.offset, entry.size, "resource")?;
            let start = payload_start + entry.offset as usize;
            resources.insert((entry.type_tag, entry.id), start..start + entry.size as usize);
        }

        let tables_bytes = section(payload, trailer.tables_offset, trailer.tables_size, "tables")?;
        let tables = RawTables::decode(tables_bytes)?;

        Ok(Self {
            trailer,
            tables,
            resources,
        })
    }

    /// Byte range of a resource within the artifact.
    pub fn range(&self, type_tag: u16, id: u32) -> Option<Range<usize>> {
        self.resources.get(&(type_tag, id)).cloned()
    }

    /// Number of resources in the directory.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Check if the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Bounds-checked sub-slice of the payload.
fn section<'a>(payload: &'a [u8], offset: u64, size: u64, what: &str) -> Result<&'a [u8], PayloadError> {
    offset
        .checked_add(size)
        .filter(|&end| end <= payload.len() as u64)
        .map(|end| &payload[offset as usize..end as usize])
        .ok_or_else(|| {
            PayloadError::Layout(format!(
                "{} at {}+{} exceeds payload of {} bytes",
                what,
                offset,
                size,
                payload.len()
            ))
        })
}
