//! Client configuration via `portex.toml`
//!
//! Every setting has a default, so an empty file (or no file at all) is a
//! valid configuration. Values are validated eagerly when loaded.

use portex_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name looked up by applications embedding the client.
pub const CONFIG_FILE_NAME: &str = "portex.toml";

fn default_upload_workers() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_chunk_size() -> usize {
    2048
}

fn default_max_items_per_chunk() -> usize {
    60_000
}

/// Client configuration loaded from `portex.toml`.
///
/// # Example
///
/// ```toml
/// upload_workers = 8
/// max_retries = 3
/// retry_backoff_ms = 100
/// chunk_size = 2048
/// max_items_per_chunk = 60000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Worker threads used to transfer upload chunks.
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
    /// Retries per chunk after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between chunk attempts; grows linearly per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on rows per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Upper bound on cells (rows x leaf columns) per chunk.
    #[serde(default = "default_max_items_per_chunk")]
    pub max_items_per_chunk: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            upload_workers: default_upload_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            chunk_size: default_chunk_size(),
            max_items_per_chunk: default_max_items_per_chunk(),
        }
    }
}

impl ClientConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero workers, a zero chunk size or a
    /// zero item budget.
    pub fn validate(&self) -> Result<()> {
        if self.upload_workers == 0 {
            return Err(Error::InvalidArgument(
                "upload_workers must be at least 1".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be at least 1".into()));
        }
        if self.max_items_per_chunk == 0 {
            return Err(Error::InvalidArgument(
                "max_items_per_chunk must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Rows per chunk for a sheet with `leaf_columns` leaf columns.
    pub fn rows_per_chunk(&self, leaf_columns: usize) -> usize {
        let by_items = self.max_items_per_chunk / leaf_columns.max(1);
        self.chunk_size.min(by_items).max(1)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Portex client configuration
#
# Worker threads used to transfer upload chunks (default: 8)
upload_workers = 8

# Retries per chunk after the first attempt (default: 3)
max_retries = 3

# Base delay between attempts in milliseconds; attempt n waits n times this
retry_backoff_ms = 100

# Rows per upload chunk are min(chunk_size, max_items_per_chunk / leaf columns)
chunk_size = 2048
max_items_per_chunk = 60000
"#
    }

    /// Parse and validate TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::InvalidArgument(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::InvalidArgument(message) => {
                Error::InvalidArgument(format!("{} ({})", message, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
