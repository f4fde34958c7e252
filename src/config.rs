//! Master startup configuration. Everything the service needs from the
//! outside world arrives here or through `MasterContext`; there are no
//! implicit globals.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

const MB: u64 = 1024 * 1024;
/// Rough in-memory footprint of one index entry, used to turn an index size
/// budget into an entry-count capacity.
const INDEX_ENTRY_BYTES: u64 = 64;

fn default_segment_bytes() -> usize {
    (8 * MB) as usize
}

fn default_log_bytes() -> u64 {
    64 * MB
}

fn default_index_entries() -> usize {
    (8 * MB / INDEX_ENTRY_BYTES) as usize
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Service locator this master listens on, handed to the coordinator at
    /// enlistment.
    pub locator: String,
    pub coordinator_locator: String,
    pub segment_bytes: usize,
    /// Total log budget; appends fail once `log_bytes / segment_bytes`
    /// segments exist.
    pub log_bytes: u64,
    /// Index capacity in entries.
    pub index_entries: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            locator: String::new(),
            coordinator_locator: String::new(),
            segment_bytes: default_segment_bytes(),
            log_bytes: default_log_bytes(),
            index_entries: default_index_entries(),
        }
    }
}

impl MasterConfig {
    pub fn new(locator: impl Into<String>, coordinator_locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            coordinator_locator: coordinator_locator.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Sets the log and index budgets from megabyte counts given as strings,
    /// the form they arrive in from a command line.
    pub fn size_log_and_index(&mut self, log_mb: &str, index_mb: &str) -> Result<(), ConfigError> {
        let log_mb = parse_mb(log_mb)?;
        let index_mb = parse_mb(index_mb)?;
        self.log_bytes = log_mb * MB;
        self.index_entries = (index_mb * MB / INDEX_ENTRY_BYTES) as usize;
        Ok(())
    }

    pub fn max_segments(&self) -> usize {
        (self.log_bytes / self.segment_bytes.max(1) as u64).max(1) as usize
    }
}

fn parse_mb(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(mb) if mb > 0 => Ok(mb),
        _ => Err(ConfigError::InvalidSize(raw.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid size in megabytes: {0:?}")]
    InvalidSize(String),
}
