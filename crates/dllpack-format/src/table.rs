//! Entry table records
//!
//! A table is a run of fixed-shape records terminated by a sentinel:
//!
//! ```text
//! u32 name_len | name | u32 origin_len | origin | u32 resource_id | u8 is_package
//! ```
//!
//! The sentinel is the same record shape with every field zero, i.e. an
//! empty name. Three tables are stored back to back: imports, data, redirects.

use crate::encoder::{ByteReader, ByteWriter, DecodeError, EncodeError};

/// Size of the all-zero sentinel record in bytes.
pub const SENTINEL_SIZE: usize = 4 + 4 + 4 + 1;

/// One record as stored in the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Dotted name (module) or exact key (data file)
    pub name: String,
    /// Relative origin path used for diagnostics
    pub origin: String,
    /// Resource id; zero means "no resource"
    pub resource_id: u32,
    /// Whether the entry is a package
    pub is_package: bool,
}

impl RawEntry {
    /// Create a record.
    pub fn new(name: impl Into<String>, origin: impl Into<String>, resource_id: u32, is_package: bool) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            resource_id,
            is_package,
        }
    }

    fn write(&self, writer: &mut ByteWriter) -> Result<(), EncodeError> {
        writer.emit_string(&self.name)?;
        writer.emit_string(&self.origin)?;
        writer.emit_u32(self.resource_id);
        writer.emit_u8(self.is_package as u8);
        Ok(())
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            origin: reader.read_string()?,
            resource_id: reader.read_u32()?,
            is_package: reader.read_u8()? != 0,
        })
    }
}

/// The three tables of a packed artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTables {
    pub imports: Vec<RawEntry>,
    pub data: Vec<RawEntry>,
    pub redirects: Vec<RawEntry>,
}

/// Write one sentinel-terminated table.
///
/// Entries with an empty name would be read back as the terminator, so they
/// are skipped.
pub fn write_table(writer: &mut ByteWriter, entries: &[RawEntry]) -> Result<(), EncodeError> {
    for entry in entries.iter().filter(|e| !e.name.is_empty()) {
        entry.write(writer)?;
    }
    writer.emit_bytes(&[0u8; SENTINEL_SIZE]);
    Ok(())
}

/// Read one sentinel-terminated table.
pub fn read_table(reader: &mut ByteReader<'_>) -> Result<Vec<RawEntry>, DecodeError> {
    let mut entries = Vec::new();
    loop {
        let entry = RawEntry::read(reader)?;
        if entry.name.is_empty() {
            return Ok(entries);
        }
        entries.push(entry);
    }
}

impl RawTables {
    /// Encode all three tables.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::new();
        write_table(&mut writer, &self.imports)?;
        write_table(&mut writer, &self.data)?;
        write_table(&mut writer, &self.redirects)?;
        Ok(writer.into_bytes())
    }

    /// Decode all three tables.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        Ok(Self {
            imports: read_table(&mut reader)?,
            data: read_table(&mut reader)?,
            redirects: read_table(&mut reader)?,
        })
    }
}
