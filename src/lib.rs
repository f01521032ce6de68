//! # compound-rs - Compound File Binary (OLE structured storage)
//!
//! `compound-rs` reads and writes Microsoft Compound File Binary files, the
//! container behind legacy Office documents, MSI packages and Outlook
//! messages. A compound file is a small filesystem packed into one file:
//!
//! - **Storages** (directories) and **streams** (files), up to 31 characters per name
//! - **Version 3** (512-byte sectors) and **version 4** (4096-byte sectors)
//! - **Mini streams** for data under 4096 bytes, packed in 64-byte mini sectors
//! - **Update in place** with `commit`, or full rewrites with `save` / `save_as`
//! - **Lenient loading** of damaged files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use compound_rs::{CompoundFile, Result};
//!
//! # fn main() -> Result<()> {
//! let cf = CompoundFile::new();
//! let root = cf.root_storage();
//!
//! // Streams and storages
//! let summary = root.add_stream("Summary")?;
//! summary.set_data(b"Hello, World!")?;
//! let nested = root.add_storage("Attachments")?;
//! nested.add_stream("report.txt")?.set_data(b"quarterly numbers")?;
//!
//! cf.save_as("hello.cfb")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use compound_rs::{CompoundFileBuilder, Result, UpdateMode};
//!
//! # fn main() -> Result<()> {
//! // Open for in-place updates, reusing freed sectors
//! let cf = CompoundFileBuilder::new()
//!     .update_mode(UpdateMode::Update)
//!     .sector_recycle(true)
//!     .open("hello.cfb")?;
//!
//! cf.root_storage().get_stream("Summary")?.append(b" Again.")?;
//! cf.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use core::{
    allocator, compound_file, config, directory, error, header, io, sector, sector_collection,
    storage, stream_view, validation,
};

pub use crate::core::{
    compound_file::{CompoundFile, HeaderInfo, OpenError},
    config::{Configuration, UpdateMode, Version},
    directory::{Clsid, EntryInfo, StorageType},
    error::{CompoundError, Result},
    io::SourceStream,
    storage::{CfStorage, CfStream, Item},
    validation::EntryName,
};

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Flattened view of one entry, with its path from the root
///
/// # Examples
///
/// ```rust,no_run
/// use compound_rs::{list_entries, CompoundFile};
///
/// # fn main() -> compound_rs::Result<()> {
/// let cf = CompoundFile::open("document.doc")?;
/// for entry in list_entries(&cf)? {
///     if entry.is_storage {
///         println!("[{}]", entry.path);
///     } else {
///         println!("{} ({} bytes)", entry.path, entry.size);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    /// Slash separated path below the root (e.g. "Attachments/report.txt")
    pub path: String,

    pub name: String,

    /// Path of the enclosing storage, empty for root-level entries
    pub parent: String,

    pub is_storage: bool,

    /// Stream length in bytes, 0 for storages
    pub size: u64,

    pub clsid: Clsid,

    pub created: Option<chrono::DateTime<chrono::Utc>>,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Every entry below the root, one storage at a time, children in
/// directory order
pub fn list_entries(cf: &CompoundFile) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pending = vec![(cf.root_storage(), String::new())];

    while let Some((storage, parent)) = pending.pop() {
        let mut nested = Vec::new();
        for item in storage.children()? {
            let info = item.info()?;
            let path = if parent.is_empty() {
                info.name.clone()
            } else {
                format!("{}/{}", parent, info.name)
            };

            if let Item::Storage(child) = &item {
                nested.push((child.clone(), path.clone()));
            }

            entries.push(Entry {
                path,
                name: info.name,
                parent: parent.clone(),
                is_storage: item.is_storage(),
                size: info.size,
                clsid: info.clsid,
                created: info.created,
                modified: info.modified,
            });
        }
        pending.extend(nested.into_iter().rev());
    }

    debug!("Listed {} entries", entries.len());
    Ok(entries)
}

/// Builder for opening or creating compound files with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use compound_rs::{CompoundFileBuilder, Version};
///
/// # fn main() -> compound_rs::Result<()> {
/// let cf = CompoundFileBuilder::new()
///     .version(Version::V4)
///     .erase_free_sectors(true)
///     .create();
/// cf.root_storage().add_stream("Data")?.set_data(&[0u8; 10_000])?;
/// cf.save_as("large.cfb")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompoundFileBuilder {
    version: Version,
    update_mode: UpdateMode,
    config: Configuration,
}

impl CompoundFileBuilder {
    /// Version 3, read-only, default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Format version of a newly created file
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn update_mode(mut self, update_mode: UpdateMode) -> Self {
        self.update_mode = update_mode;
        self
    }

    /// Reuse free sectors before growing the file
    pub fn sector_recycle(mut self, enabled: bool) -> Self {
        self.config.sector_recycle = enabled;
        self
    }

    /// Zero the content of freed sectors
    pub fn erase_free_sectors(mut self, enabled: bool) -> Self {
        self.config.erase_free_sectors = enabled;
        self
    }

    /// Log structural corruption instead of failing the load
    pub fn lenient(mut self, enabled: bool) -> Self {
        self.config.no_validation_exception = enabled;
        self
    }

    /// Keep the backing stream alive after close (see `CompoundFile::take_source`)
    pub fn leave_open(mut self, enabled: bool) -> Self {
        self.config.leave_open = enabled;
        self
    }

    /// Replace all flags at once, e.g. with one read from TOML
    pub fn configuration(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    /// Create an empty in-memory file
    pub fn create(self) -> CompoundFile {
        info!("Creating v{} compound file", self.version as u16);
        CompoundFile::with_options(self.version, self.config)
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<CompoundFile> {
        CompoundFile::open_with(path, self.update_mode, self.config)
    }

    pub fn open_stream<S: SourceStream + 'static>(self, stream: S) -> Result<CompoundFile> {
        CompoundFile::from_stream(stream, self.update_mode, self.config)
    }
}
