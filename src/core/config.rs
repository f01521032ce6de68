//! Open/create options for compound files
//!
//! Flags can be set in code with the chainable `with_*` setters or loaded
//! from TOML:
//!
//! ```toml
//! sector_recycle = true
//! erase_free_sectors = false
//! no_validation_exception = false
//! leave_open = false
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sector size family of a compound file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum Version {
    /// 512-byte sectors
    #[default]
    V3 = 3,
    /// 4096-byte sectors
    V4 = 4,
}

impl Version {
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            3 => Some(Version::V3),
            4 => Some(Version::V4),
            _ => None,
        }
    }

    pub fn sector_shift(self) -> u16 {
        match self {
            Version::V3 => 9,
            Version::V4 => 12,
        }
    }

    pub fn sector_size(self) -> usize {
        1usize << self.sector_shift()
    }
}

/// Whether `commit` may write back to the source the file was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    #[default]
    ReadOnly,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Reuse FREESECT sectors before growing the file
    pub sector_recycle: bool,

    /// Zero the payload of freed sectors
    pub erase_free_sectors: bool,

    /// Log corruption instead of failing; reads become best effort
    pub no_validation_exception: bool,

    /// Keep the backing stream alive after close (see `CompoundFile::take_source`)
    pub leave_open: bool,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sector_recycle(mut self, enabled: bool) -> Self {
        self.sector_recycle = enabled;
        self
    }

    pub fn with_erase_free_sectors(mut self, enabled: bool) -> Self {
        self.erase_free_sectors = enabled;
        self
    }

    pub fn with_no_validation_exception(mut self, enabled: bool) -> Self {
        self.no_validation_exception = enabled;
        self
    }

    pub fn with_leave_open(mut self, enabled: bool) -> Self {
        self.leave_open = enabled;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
