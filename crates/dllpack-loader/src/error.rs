//! Loader error types.
//!
//! Every error names the module or data path it was raised for, and maps to
//! one [`ErrorKind`] so hosts can react to the kind without parsing text.

use std::fmt;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::host::HostError;
use crate::storage::StorageError;

/// Terminal error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModuleNotFound,
    ResourceUnavailable,
    TruncatedModule,
    InvalidFraming,
    DecodeError,
    PlatformCryptoError,
    SystemError,
    OriginUnavailable,
    DeserializeError,
    ExecutionError,
    AuditRejected,
    InvalidTransition,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ModuleNotFound => "ModuleNotFound",
            ErrorKind::ResourceUnavailable => "ResourceUnavailable",
            ErrorKind::TruncatedModule => "TruncatedModule",
            ErrorKind::InvalidFraming => "InvalidFraming",
            ErrorKind::DecodeError => "DecodeError",
            ErrorKind::PlatformCryptoError => "PlatformCryptoError",
            ErrorKind::SystemError => "SystemError",
            ErrorKind::OriginUnavailable => "OriginUnavailable",
            ErrorKind::DeserializeError => "DeserializeError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::AuditRejected => "AuditRejected",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::Config => "Config",
        };
        f.write_str(name)
    }
}

/// Errors raised by the loader.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Name resolves to nothing and is not an implied package
    #[error("ModuleNotFound: '{name}' is not part of this package")]
    ModuleNotFound { name: String },

    /// Storage cannot produce bytes for a resolved entry
    #[error("ResourceUnavailable: unable to open '{name}'")]
    ResourceUnavailable { name: String },

    /// Code resource shorter than its header
    #[error("TruncatedModule: unable to import '{name}' ({len} bytes, header is {header_len})")]
    TruncatedModule {
        name: String,
        len: usize,
        header_len: usize,
    },

    /// Malformed resource or table contents
    #[error("InvalidFraming: '{name}': {reason}")]
    InvalidFraming { name: String, reason: String },

    /// Ciphertext failed to decrypt (bad key or tampered data)
    #[error("DecodeError: failed to decode '{name}'")]
    Decode { name: String },

    /// Any other cipher failure
    #[error("PlatformCryptoError: '{name}': {message}")]
    PlatformCrypto { name: String, message: String },

    /// Platform failure while reading the artifact
    #[error("SystemError: '{name}': {message}{}", .code.map(|c| format!(" (os error {})", c)).unwrap_or_default())]
    System {
        name: String,
        code: Option<i32>,
        message: String,
    },

    /// The artifact's own location cannot be determined
    #[error("OriginUnavailable: cannot locate artifact for '{name}': {reason}")]
    OriginUnavailable { name: String, reason: String },

    /// Host runtime rejected the marshalled code
    #[error("DeserializeError: unable to unmarshal '{name}': {source}")]
    Deserialize {
        name: String,
        #[source]
        source: HostError,
    },

    /// Host runtime failed while running module code
    #[error("ExecutionError: error executing '{name}': {source}")]
    Execution {
        name: String,
        #[source]
        source: HostError,
    },

    /// An audit hook vetoed the operation
    #[error("AuditRejected: {event} for '{name}': {source}")]
    AuditRejected {
        event: &'static str,
        name: String,
        #[source]
        source: HostError,
    },

    /// Import step called out of order
    #[error("InvalidTransition: import of '{name}' cannot {step} while {state}")]
    InvalidTransition {
        name: String,
        step: &'static str,
        state: String,
    },

    /// Invalid configuration
    #[error("Config: {0}")]
    Config(#[from] ConfigError),
}

impl LoaderError {
    /// Terminal kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::ModuleNotFound { .. } => ErrorKind::ModuleNotFound,
            LoaderError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            LoaderError::TruncatedModule { .. } => ErrorKind::TruncatedModule,
            LoaderError::InvalidFraming { .. } => ErrorKind::InvalidFraming,
            LoaderError::Decode { .. } => ErrorKind::DecodeError,
            LoaderError::PlatformCrypto { .. } => ErrorKind::PlatformCryptoError,
            LoaderError::System { .. } => ErrorKind::SystemError,
            LoaderError::OriginUnavailable { .. } => ErrorKind::OriginUnavailable,
            LoaderError::Deserialize { .. } => ErrorKind::DeserializeError,
            LoaderError::Execution { .. } => ErrorKind::ExecutionError,
            LoaderError::AuditRejected { .. } => ErrorKind::AuditRejected,
            LoaderError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LoaderError::Config(_) => ErrorKind::Config,
        }
    }

    /// Attach a resource name to a storage failure.
    pub fn storage(name: impl Into<String>, err: StorageError) -> Self {
        let name = name.into();
        match err {
            StorageError::Unavailable => LoaderError::ResourceUnavailable { name },
            StorageError::System { code, message } => LoaderError::System {
                name,
                code,
                message,
            },
            StorageError::Origin(reason) => LoaderError::OriginUnavailable { name, reason },
        }
    }

    /// Attach a resource name to a decryption failure.
    pub fn crypto(name: impl Into<String>, err: CryptoError) -> Self {
        let name = name.into();
        match err {
            CryptoError::Decode => LoaderError::Decode { name },
            CryptoError::Platform(message) => LoaderError::PlatformCrypto { name, message },
            CryptoError::Framing(reason) => LoaderError::InvalidFraming { name, reason },
        }
    }
}
