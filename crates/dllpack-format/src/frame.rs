//! Resource framing
//!
//! Two framings wrap resource bytes:
//!
//! - **Code**: a fixed-length header (the host's bytecode-cache header)
//!   followed by marshalled code.
//! - **Encrypted**: wraps either kind of resource when the artifact was packed
//!   with a key.
//!
//! ```text
//! u32 plain_length | u32 cipher_length | u32 iv_length | iv | ciphertext
//! ```
//!
//! There is no overall length prefix; the storage backend already knows the
//! resource size.

use thiserror::Error;

use crate::encoder::{ByteReader, ByteWriter, DecodeError, EncodeError};

/// Default length of the code header.
pub const CODE_HEADER_LEN: usize = 16;

/// Largest IV accepted in an encrypted frame.
pub const MAX_IV_LEN: usize = 512;

/// Size of the fixed part of the encrypted header (three u32 fields).
pub const ENCRYPTED_HEADER_LEN: usize = 12;

/// Errors in an encrypted frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The fixed header or the IV is cut short
    #[error("encrypted header is truncated: {0}")]
    Truncated(#[from] DecodeError),

    /// IV longer than the allowed maximum
    #[error("requested IV length ({len}) is too large (max {max})")]
    IvTooLarge { len: u32, max: usize },

    /// Declared ciphertext runs past the end of the resource
    #[error("ciphertext length {declared} exceeds the {available} bytes available")]
    CiphertextOverrun { declared: u32, available: usize },
}

/// A parsed encrypted frame borrowing from the resource bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedFrame<'a> {
    /// Plaintext length recorded by the packer
    pub plain_length: u32,
    /// Initialization vector
    pub iv: &'a [u8],
    /// Ciphertext, exactly `cipher_length` bytes
    pub ciphertext: &'a [u8],
}

impl<'a> EncryptedFrame<'a> {
    /// Parse a frame, rejecting IVs longer than `max_iv_len`.
    ///
    /// Bytes after the declared ciphertext are ignored.
    pub fn parse(bytes: &'a [u8], max_iv_len: usize) -> Result<Self, FrameError> {
        let mut reader = ByteReader::new(bytes);
        let plain_length = reader.read_u32()?;
        let cipher_length = reader.read_u32()?;
        let iv_length = reader.read_u32()?;

        if iv_length as usize > max_iv_len {
            return Err(FrameError::IvTooLarge {
                len: iv_length,
                max: max_iv_len,
            });
        }
        let iv = reader.read_slice(iv_length as usize)?;

        let available = reader.remaining();
        if cipher_length as usize > available {
            return Err(FrameError::CiphertextOverrun {
                declared: cipher_length,
                available,
            });
        }
        let ciphertext = reader.read_slice(cipher_length as usize)?;

        Ok(Self {
            plain_length,
            iv,
            ciphertext,
        })
    }

    /// Encode a frame.
    pub fn encode(plain_length: usize, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut writer =
            ByteWriter::with_capacity(ENCRYPTED_HEADER_LEN + iv.len() + ciphertext.len());
        writer.emit_len(plain_length)?;
        writer.emit_len(ciphertext.len())?;
        writer.emit_len(iv.len())?;
        writer.emit_bytes(iv);
        writer.emit_bytes(ciphertext);
        Ok(writer.into_bytes())
    }
}

/// The 16-byte bytecode-cache header written in front of marshalled code.
///
/// The loader only relies on its length; the fields are written by packers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHeader {
    /// Host bytecode magic number
    pub magic: [u8; 4],
    /// Invalidation flags
    pub flags: u32,
    /// Source hash or mtime/size pair
    pub source_stamp: u64,
}

impl CodeHeader {
    /// Header for hash-based, unchecked bytecode.
    pub fn unchecked(magic: [u8; 4], source_hash: u64) -> Self {
        Self {
            magic,
            flags: 0b01,
            source_stamp: source_hash,
        }
    }

    /// Encode to the fixed header length.
    pub fn encode(&self) -> [u8; CODE_HEADER_LEN] {
        let mut out = [0u8; CODE_HEADER_LEN];
        out[..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..].copy_from_slice(&self.source_stamp.to_le_bytes());
        out
    }

    /// Prefix marshalled code with this header.
    pub fn frame(&self, code: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(CODE_HEADER_LEN + code.len());
        out.extend_from_slice(&self.encode());
        out.extend_from_slice(code);
        out
    }
}

/// Strip a code header of `header_len` bytes.
///
/// Returns `None` when the buffer is shorter than the header.
pub fn strip_code_header(bytes: &[u8], header_len: usize) -> Option<&[u8]> {
    bytes.get(header_len..)
}
