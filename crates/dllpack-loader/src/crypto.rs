//! Resource decryption
//!
//! Encrypted artifacts wrap every resource in an [`EncryptedFrame`] holding
//! AES-CBC ciphertext with PKCS#7 padding. The key length picks the variant
//! (16, 24 or 32 bytes).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use dllpack_format::{EncodeError, EncryptedFrame, FrameError};
use thiserror::Error;
use tracing::debug;

/// AES block size; also the only accepted IV length.
pub const BLOCK_SIZE: usize = 16;

/// Prefix marking a base64-encoded key.
pub const BASE64_PREFIX: &str = "base64:";

/// Decryption failures, before a resource name is attached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Padding check failed: wrong key or tampered ciphertext
    #[error("failed to decode")]
    Decode,

    /// Any other cipher failure
    #[error("{0}")]
    Platform(String),

    /// Malformed frame
    #[error("{0}")]
    Framing(String),
}

impl From<EncodeError> for CryptoError {
    fn from(err: EncodeError) -> Self {
        CryptoError::Framing(err.to_string())
    }
}

impl From<FrameError> for CryptoError {
    fn from(err: FrameError) -> Self {
        CryptoError::Framing(err.to_string())
    }
}

enum CipherKey {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

impl CipherKey {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = || CryptoError::Platform(format!("invalid key length {}", key.len()));
        match key.len() {
            16 => Ok(CipherKey::Aes128(key.try_into().map_err(|_| invalid())?)),
            24 => Ok(CipherKey::Aes192(key.try_into().map_err(|_| invalid())?)),
            32 => Ok(CipherKey::Aes256(key.try_into().map_err(|_| invalid())?)),
            _ => Err(invalid()),
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            CipherKey::Aes128(k) => k,
            CipherKey::Aes192(k) => k,
            CipherKey::Aes256(k) => k,
        }
    }
}

/// Read the key from `variable` and remove it from the environment.
///
/// The variable is removed before the value is interpreted, so it is gone
/// even when the value turns out to be malformed.
pub fn take_key(variable: &str) -> Result<Vec<u8>, CryptoError> {
    let value = std::env::var_os(variable).ok_or_else(|| {
        CryptoError::Platform(format!("decryption key variable {} is not set", variable))
    })?;
    std::env::remove_var(variable);

    let value = value.into_string().map_err(|_| {
        CryptoError::Platform(format!("decryption key in {} is not valid UTF-8", variable))
    })?;
    parse_key(&value)
}

/// Decode a key value: `base64:` followed by base64, or the raw UTF-8 bytes.
pub fn parse_key(value: &str) -> Result<Vec<u8>, CryptoError> {
    match value.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Platform(format!("invalid base64 key: {}", e))),
        None => Ok(value.as_bytes().to_vec()),
    }
}

/// Holds the artifact key for the lifetime of an artifact context.
///
/// The key is overwritten with zeros when the decryptor is dropped.
pub struct Decryptor {
    key: CipherKey,
    max_iv_len: usize,
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decryptor")
            .field("key_bits", &self.key_bits())
            .field("max_iv_len", &self.max_iv_len)
            .finish()
    }
}

impl Decryptor {
    pub fn new(key: &[u8], max_iv_len: usize) -> Result<Self, CryptoError> {
        Ok(Self {
            key: CipherKey::new(key)?,
            max_iv_len,
        })
    }

    /// Acquire the key from the environment.
    pub fn from_env(variable: &str, max_iv_len: usize) -> Result<Self, CryptoError> {
        let mut key = take_key(variable)?;
        let decryptor = Self::new(&key, max_iv_len);
        wipe(&mut key);
        let decryptor = decryptor?;
        debug!(key_bits = decryptor.key_bits(), "decryption key acquired");
        Ok(decryptor)
    }

    pub fn key_bits(&self) -> usize {
        match self.key {
            CipherKey::Aes128(_) => 128,
            CipherKey::Aes192(_) => 192,
            CipherKey::Aes256(_) => 256,
        }
    }

    /// Parse a resource's frame, enforcing the IV limit.
    pub fn parse_frame<'a>(&self, bytes: &'a [u8]) -> Result<EncryptedFrame<'a>, CryptoError> {
        Ok(EncryptedFrame::parse(bytes, self.max_iv_len)?)
    }

    /// Decrypt a parsed frame and check it against its recorded length.
    pub fn decrypt_frame(&self, frame: &EncryptedFrame<'_>) -> Result<Vec<u8>, CryptoError> {
        let plain = self.decrypt(frame.iv, frame.ciphertext)?;
        if plain.len() > frame.plain_length as usize {
            return Err(CryptoError::Framing(format!(
                "decrypted {} bytes, frame declares {}",
                plain.len(),
                frame.plain_length
            )));
        }
        Ok(plain)
    }

    /// Decrypt CBC ciphertext and strip its padding.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_lengths(iv, ciphertext.len())?;
        let result = match &self.key {
            CipherKey::Aes128(k) => cbc::Decryptor::<aes::Aes128>::new_from_slices(k, iv)
                .map_err(platform)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            CipherKey::Aes192(k) => cbc::Decryptor::<aes::Aes192>::new_from_slices(k, iv)
                .map_err(platform)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            CipherKey::Aes256(k) => cbc::Decryptor::<aes::Aes256>::new_from_slices(k, iv)
                .map_err(platform)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        result.map_err(|_| CryptoError::Decode)
    }
}

impl Drop for Decryptor {
    fn drop(&mut self) {
        wipe(self.key.bytes_mut());
    }
}

/// Zero key material with stores the optimizer cannot elide.
fn wipe(bytes: &mut [u8]) {
    for byte in bytes {
        // SAFETY: `byte` is a valid, exclusive reference
        unsafe { std::ptr::write_volatile(byte, 0) };
    }
}

fn platform(err: impl std::fmt::Display) -> CryptoError {
    CryptoError::Platform(err.to_string())
}

fn check_lengths(iv: &[u8], cipher_len: usize) -> Result<(), CryptoError> {
    if iv.len() != BLOCK_SIZE {
        return Err(CryptoError::Platform(format!(
            "IV must be {} bytes, got {}",
            BLOCK_SIZE,
            iv.len()
        )));
    }
    if cipher_len % BLOCK_SIZE != 0 {
        return Err(CryptoError::Platform(format!(
            "ciphertext length {} is not a multiple of the block size",
            cipher_len
        )));
    }
    Ok(())
}

/// Encrypt `plaintext` with PKCS#7 padding. Used by packers and tests.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_lengths(iv, 0)?;
    let ciphertext = match CipherKey::new(key)? {
        CipherKey::Aes128(k) => cbc::Encryptor::<aes::Aes128>::new_from_slices(&k, iv)
            .map_err(platform)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        CipherKey::Aes192(k) => cbc::Encryptor::<aes::Aes192>::new_from_slices(&k, iv)
            .map_err(platform)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        CipherKey::Aes256(k) => cbc::Encryptor::<aes::Aes256>::new_from_slices(&k, iv)
            .map_err(platform)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ciphertext)
}

/// Encrypt `plaintext` and wrap it in a resource frame.
pub fn encrypt_frame(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = encrypt(key, iv, plaintext)?;
    Ok(EncryptedFrame::encode(plaintext.len(), iv, &ciphertext)?)
}
