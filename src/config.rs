//! Automaton configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Tunables for state reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bytes per block-layer sector.
    pub sector_size: u64,
    /// Maximum number of dirty-page records kept; oldest are dropped first.
    pub max_dirty_pages: usize,
    /// Keep per-FD, per-process and per-disk I/O request histories.
    /// Counters are maintained either way.
    pub record_io_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sector_size: 512,
            max_dirty_pages: 1000,
            record_io_requests: true,
        }
    }
}

impl Config {
    /// Loads a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 {
            return Err(Error::Config("sector_size must be non-zero".to_string()));
        }
        Ok(())
    }
}
