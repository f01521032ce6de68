//! Compound File Binary engine
//!
//! ## Layers
//!
//! - [`header`] - 512-byte header codec (signature, geometry, inline DIFAT)
//! - [`sector`], [`sector_collection`] - sectors and the lazily loaded arena
//! - [`stream_view`] - byte stream over a sector chain
//! - [`allocator`] - chain resolution and FAT / DIFAT / MiniFAT allocation
//! - [`directory`] - directory records and per-storage red-black trees
//! - [`compound_file`], [`storage`] - lifecycle and the public handles
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (512 B, padded to one sector on v4)  │
//! │  - Signature D0 CF 11 E0 A1 B1 1A E1        │
//! │  - Sector shift, counts, first 109 FAT ids  │
//! ├─────────────────────────────────────────────┤
//! │ Sector 0..N (512 B on v3, 4096 B on v4)     │
//! │  - FAT / DIFAT sectors                      │
//! │  - Directory chain (128 B records)          │
//! │  - MiniFAT chain                            │
//! │  - Ministream (64 B mini sectors)           │
//! │  - Stream data                              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod compound_file;
pub mod config;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod sector;
pub mod sector_collection;
pub mod storage;
mod stream_data;
pub mod stream_view;
pub mod validation;

pub use compound_file::{CompoundFile, HeaderInfo, OpenError};
pub use config::{Configuration, UpdateMode, Version};
pub use directory::{Clsid, EntryInfo, StorageType};
pub use error::{CompoundError, Result};
pub use header::Header;
pub use io::SourceStream;
pub use storage::{CfStorage, CfStream, Item};
pub use validation::EntryName;
