// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Selects the POSIX backend used to acquire new regions and the policy
//! applied to handles received from other processes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, ShmemError, ShmemResult};

/// Maximum length of the shm_open name prefix. Names are
/// `/<prefix>-<16 hex>`, and Apple kernels cap them at 31 bytes.
#[cfg(target_vendor = "apple")]
const MAX_NAME_PREFIX_LEN: usize = 13;

#[cfg(not(target_vendor = "apple"))]
const MAX_NAME_PREFIX_LEN: usize = 64;

/// How new regions acquire their descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Anonymous `memfd_create` object, re-opened read-only through procfs.
    Memfd,
    /// Transient `shm_open` object, opened twice and unlinked immediately.
    ShmOpen,
}

impl Backend {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memfd => "memfd",
            Self::ShmOpen => "shm_open",
        }
    }

    /// Whether the backend exists on the compilation target.
    pub const fn is_supported(&self) -> bool {
        match self {
            Self::Memfd => cfg!(any(target_os = "linux", target_os = "android")),
            Self::ShmOpen => true,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        if Self::Memfd.is_supported() {
            Self::Memfd
        } else {
            Self::ShmOpen
        }
    }
}

/// Raw configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShmemConfig {
    #[serde(default)]
    backend: Backend,
    #[serde(default = "default_name_prefix")]
    name_prefix: String,
    #[serde(default = "default_verify_received_handles")]
    verify_received_handles: bool,
}

fn default_name_prefix() -> String {
    "shmem".to_string()
}

fn default_verify_received_handles() -> bool {
    true
}

/// Validated shared memory configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmemConfig {
    pub backend: Backend,
    pub name_prefix: String,
    pub verify_received_handles: bool,
}

impl Default for ShmemConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            name_prefix: default_name_prefix(),
            verify_received_handles: default_verify_received_handles(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ShmemResult<ShmemConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShmemError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShmemError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ShmemResult<ShmemConfig> {
        let raw: RawShmemConfig =
            serde_yaml::from_str(content).map_err(|e| ShmemError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawShmemConfig) -> Result<ShmemConfig, HardValidationError> {
        if !raw.backend.is_supported() {
            return Err(HardValidationError::UnsupportedBackend {
                backend: raw.backend.name(),
            });
        }

        Self::validate_name_prefix(&raw.name_prefix)?;

        Ok(ShmemConfig {
            backend: raw.backend,
            name_prefix: raw.name_prefix,
            verify_received_handles: raw.verify_received_handles,
        })
    }

    /// The prefix becomes part of a `/name` passed to shm_open, so no slashes.
    fn validate_name_prefix(prefix: &str) -> Result<(), HardValidationError> {
        if prefix.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "name_prefix",
                value: String::new(),
                reason: "Name prefix cannot be empty".to_string(),
            });
        }

        if prefix.len() > MAX_NAME_PREFIX_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "name_prefix",
                value: prefix.to_string(),
                reason: format!(
                    "Name prefix too long: {} chars (max {})",
                    prefix.len(),
                    MAX_NAME_PREFIX_LEN
                ),
            });
        }

        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "name_prefix",
                value: prefix.to_string(),
                reason: "Name prefix must contain only ASCII alphanumerics, '-', '_' and '.'"
                    .to_string(),
            });
        }

        Ok(())
    }
}
