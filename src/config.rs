//! [`Config`]: engine configuration (§6, ambient stack §2).
//!
//! Builder-style, mirroring `robt_config.rs`'s `pub fn` setters returning
//! `Self`, with an optional TOML loader (the `cli` feature) for the
//! standalone server binary.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const DEFAULT_BUFFER_PAGE_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Engine configuration: where the Buffer and Database live on disk, the
/// Buffer's page size, and the log level the ambient logging stack should
/// run at (§6 CLI/env).
#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    pub buffer_directory: PathBuf,
    pub database_directory: PathBuf,
    #[serde(default = "default_buffer_page_size")]
    pub buffer_page_size: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_buffer_page_size() -> usize {
    DEFAULT_BUFFER_PAGE_SIZE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn new(buffer_directory: impl Into<PathBuf>, database_directory: impl Into<PathBuf>) -> Config {
        Config {
            buffer_directory: buffer_directory.into(),
            database_directory: database_directory.into(),
            buffer_page_size: DEFAULT_BUFFER_PAGE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            log_level: default_log_level(),
        }
    }

    pub fn buffer_page_size(mut self, size: usize) -> Config {
        self.buffer_page_size = size;
        self
    }

    pub fn block_size(mut self, size: usize) -> Config {
        self.block_size = size;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Config {
        self.log_level = level.into();
        self
    }

    /// Load from a TOML file (`cli` feature). Unset fields take the
    /// defaults above.
    #[cfg(feature = "cli")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::InvalidConfig(format!("bad config toml: {}", e)))
    }

    /// §6: "Engine refuses to start if the two directories are the same or
    /// nested."
    pub fn validate(&self) -> Result<()> {
        let buf = normalize(&self.buffer_directory);
        let db = normalize(&self.database_directory);
        if buf == db {
            return Err(Error::InvalidConfig(
                "buffer_directory and database_directory must not be the same path".into(),
            ));
        }
        if buf.starts_with(&db) || db.starts_with(&buf) {
            return Err(Error::InvalidConfig(
                "buffer_directory and database_directory must not be nested".into(),
            ));
        }
        Ok(())
    }
}

/// Best-effort path normalization without requiring the directory to
/// already exist (`Path::canonicalize` would fail on a fresh install).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod config_test;
