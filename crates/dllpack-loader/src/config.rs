//! Pack configuration (pack.toml)
//!
//! Per-artifact settings the packer records next to the tables. The defaults
//! match the layout constants in `dllpack-format`.

use std::path::Path;

use dllpack_format::{CODE_HEADER_LEN, MAX_IV_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource type tag of the code bucket.
pub const CODE_RESOURCE_TYPE: u16 = 257;

/// Resource type tag of the data bucket.
pub const DATA_RESOURCE_TYPE: u16 = 258;

/// An IV is exactly one AES block.
const MIN_IV_LEN: usize = 16;

/// Errors that can occur while loading a pack configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read pack config: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse pack config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid pack config: {0}")]
    ValidationError(String),
}

/// Settings for one packed artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackConfig {
    /// Dotted name of the package this artifact provides
    pub module_name: String,

    /// Length of the header in front of marshalled code
    #[serde(default = "default_code_header_len")]
    pub code_header_len: usize,

    /// Largest IV accepted in an encrypted frame
    #[serde(default = "default_max_iv_len")]
    pub max_iv_len: usize,

    /// Environment variable holding the decryption key (unset = plaintext artifact)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_key_variable: Option<String>,

    /// Type tag of code resources
    #[serde(default = "default_code_resource_type")]
    pub code_resource_type: u16,

    /// Type tag of data resources
    #[serde(default = "default_data_resource_type")]
    pub data_resource_type: u16,
}

fn default_code_header_len() -> usize {
    CODE_HEADER_LEN
}

fn default_max_iv_len() -> usize {
    MAX_IV_LEN
}

fn default_code_resource_type() -> u16 {
    CODE_RESOURCE_TYPE
}

fn default_data_resource_type() -> u16 {
    DATA_RESOURCE_TYPE
}

impl PackConfig {
    /// Config for a plaintext artifact with default layout.
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            code_header_len: default_code_header_len(),
            max_iv_len: default_max_iv_len(),
            encrypt_key_variable: None,
            code_resource_type: default_code_resource_type(),
            data_resource_type: default_data_resource_type(),
        }
    }

    /// Mark the artifact as encrypted with the key in `variable`.
    pub fn with_encryption(mut self, variable: impl Into<String>) -> Self {
        self.encrypt_key_variable = Some(variable.into());
        self
    }

    /// Load a config from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PackConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "module_name cannot be empty".to_string(),
            ));
        }

        for part in self.module_name.split('.') {
            if !is_identifier(part) {
                return Err(ConfigError::ValidationError(format!(
                    "module_name '{}' is not a dotted identifier",
                    self.module_name
                )));
            }
        }

        if self.code_resource_type == self.data_resource_type {
            return Err(ConfigError::ValidationError(format!(
                "code and data resources share type tag {}",
                self.code_resource_type
            )));
        }

        if !(MIN_IV_LEN..=MAX_IV_LEN).contains(&self.max_iv_len) {
            return Err(ConfigError::ValidationError(format!(
                "max_iv_len must be between {} and {}, got {}",
                MIN_IV_LEN, MAX_IV_LEN, self.max_iv_len
            )));
        }

        if let Some(variable) = &self.encrypt_key_variable {
            if variable.is_empty() || variable.contains('=') || variable.contains('\0') {
                return Err(ConfigError::ValidationError(format!(
                    "'{}' is not a valid environment variable name",
                    variable
                )));
            }
        }

        Ok(())
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
