//! Packed artifact binary layouts
//!
//! Everything the loader reads out of a packed artifact, and the writer half
//! that packers use to produce it:
//! - **encoder**: little-endian reader/writer primitives
//! - **table**: sentinel-terminated entry tables (imports, data, redirects)
//! - **frame**: code header and encrypted resource framing
//! - **payload**: resource table appended to an executable or shared object

#![warn(rust_2018_idioms)]

pub mod encoder;
pub mod frame;
pub mod payload;
pub mod table;

pub use encoder::{ByteReader, ByteWriter, DecodeError, EncodeError};
pub use frame::{
    strip_code_header, CodeHeader, EncryptedFrame, FrameError, CODE_HEADER_LEN,
    ENCRYPTED_HEADER_LEN, MAX_IV_LEN,
};
pub use payload::{
    DirectoryEntry, PayloadBuilder, PayloadError, PayloadIndex, Trailer, TRAILER_MAGIC,
    TRAILER_SIZE,
};
pub use table::{RawEntry, RawTables};
