//! Compound file lifecycle: load, commit, save, shrink, close
//!
//! `CompoundState` owns the header, the sector arena and the directory.
//! The allocator, resolver and stream data modules extend it with their
//! own `impl` blocks. `CompoundFile` and the storage/stream handles share
//! one state behind a mutex.

use crate::config::{Configuration, UpdateMode, Version};
use crate::directory::{Clsid, DirectoryArena, DirectoryEntry, StorageType, DIRECTORY_ENTRY_SIZE};
use crate::error::{CompoundError, Result};
use crate::header::Header;
use crate::io::{CompoundSource, SourceStream};
use crate::sector::{range_lock_sector_id, SectorType, ENDOFCHAIN};
use crate::sector_collection::SectorCollection;
use crate::storage::{CfStorage, Item};
use crate::stream_view::{NormalDevice, StreamView};
use crate::validation::EntryName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct CompoundState {
    pub(crate) header: Header,
    pub(crate) sectors: SectorCollection,
    pub(crate) directory: DirectoryArena,
    pub(crate) config: Configuration,
    pub(crate) update_mode: UpdateMode,
    pub(crate) disposed: bool,

    /// Backing stream kept alive by `leave_open` after close
    parked_source: Option<Box<dyn SourceStream>>,
}

fn range_lock_for(version: Version) -> Option<u32> {
    match version {
        Version::V3 => None,
        Version::V4 => Some(range_lock_sector_id(version.sector_size())),
    }
}

impl CompoundState {
    /// Empty in-memory file holding only the root storage
    pub(crate) fn create(version: Version, config: Configuration) -> Self {
        CompoundState {
            header: Header::new(version),
            sectors: SectorCollection::new(version.sector_size(), range_lock_for(version)),
            directory: DirectoryArena::new(),
            config,
            update_mode: UpdateMode::ReadOnly,
            disposed: false,
            parked_source: None,
        }
    }

    /// Parse header and directory from `source`. Sectors are read lazily.
    /// On failure the source comes back with the error when it is still
    /// held.
    pub(crate) fn load(
        mut source: CompoundSource,
        update_mode: UpdateMode,
        config: Configuration,
    ) -> std::result::Result<Self, (CompoundError, Option<CompoundSource>)> {
        let (header, count) = match Self::read_geometry(&mut source) {
            Ok(geometry) => geometry,
            Err(e) => return Err((e, Some(source))),
        };
        let version = header.version();

        debug!(
            "Loading v{} compound file: {} sectors of {} bytes",
            version as u16,
            count,
            header.sector_size()
        );

        let mut state = CompoundState {
            sectors: SectorCollection::with_source(
                header.sector_size(),
                source,
                count,
                range_lock_for(version),
            ),
            header,
            directory: DirectoryArena::new(),
            config,
            update_mode,
            disposed: false,
            parked_source: None,
        };

        if let Err(e) = state.load_directory() {
            return Err((e, state.sectors.take_source()));
        }
        Ok(state)
    }

    /// Header plus the number of whole or partial sectors behind it
    fn read_geometry(source: &mut CompoundSource) -> Result<(Header, usize)> {
        let header = source.read_header()?;
        let sector_size = header.sector_size() as u64;
        let count = source.len()?.saturating_sub(sector_size).div_ceil(sector_size);
        let count = usize::try_from(count)
            .map_err(|_| CompoundError::InvalidHeader(format!("{} sectors", count)))?;
        Ok((header, count))
    }

    fn load_directory(&mut self) -> Result<()> {
        let chain = self.normal_chain(self.header.first_directory_sector)?;
        if chain.is_empty() {
            return Err(CompoundError::Corrupted(
                "directory chain is empty".to_string(),
            ));
        }

        let version = self.header.version();
        let per_sector = self.sectors.sector_size() / DIRECTORY_ENTRY_SIZE;
        let mut entries = Vec::with_capacity(chain.len() * per_sector);

        for &id in &chain {
            let sector = self.sectors.get(id)?;
            for record in sector.data.chunks_exact(DIRECTORY_ENTRY_SIZE) {
                let sid = entries.len() as u32;
                entries.push(DirectoryEntry::from_bytes(sid, record, version)?);
            }
        }

        self.directory = DirectoryArena::from_entries(entries);
        self.directory
            .load_trees(self.config.no_validation_exception)?;

        debug!(
            "Loaded {} directory entries from {} sectors",
            self.directory.len(),
            chain.len()
        );
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.disposed {
            Err(CompoundError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Write the directory array into its sector chain. The chain only
    /// grows; surplus records are written as invalid entries.
    fn commit_directory(&mut self) -> Result<()> {
        let sector_size = self.sectors.sector_size();
        let per_sector = sector_size / DIRECTORY_ENTRY_SIZE;
        let version = self.header.version();

        let existing = self.normal_chain(self.header.first_directory_sector)?;
        let sector_count = self.directory.len().div_ceil(per_sector).max(existing.len());

        let mut bytes = Vec::with_capacity(sector_count * sector_size);
        for entry in self.directory.entries() {
            bytes.extend_from_slice(&entry.to_bytes(version));
        }
        let mut sid = self.directory.len() as u32;
        while bytes.len() < sector_count * sector_size {
            bytes.extend_from_slice(&DirectoryEntry::invalid(sid).to_bytes(version));
            sid += 1;
        }

        let mut view = StreamView::new(existing, 0);
        {
            let mut device = NormalDevice::new(&mut self.sectors, SectorType::Directory);
            view.write(&mut device, &bytes)?;
        }
        self.allocate_sector_chain(view.chain())?;

        let chain = view.into_chain();
        self.header.first_directory_sector = chain.first().copied().unwrap_or(ENDOFCHAIN);
        self.header.directory_sectors_count = match version {
            Version::V3 => 0,
            Version::V4 => chain.len() as u32,
        };
        Ok(())
    }

    /// Flush dirty sectors, the directory and the header to the backing
    /// medium, then trim it to the arena size
    pub(crate) fn commit(&mut self, release_memory: bool) -> Result<()> {
        self.check_open()?;
        if self.update_mode != UpdateMode::Update {
            return Err(CompoundError::InvalidOperation(
                "cannot commit a file opened read-only".to_string(),
            ));
        }
        if !self.sectors.has_source() {
            return Err(CompoundError::InvalidOperation(
                "no backing stream to commit to".to_string(),
            ));
        }

        self.commit_directory()?;
        let written = self.sectors.flush_dirty(release_memory)?;

        let sector_size = self.sectors.sector_size() as u64;
        let total = (self.sectors.len() as u64 + 1) * sector_size;
        let header = self.header.to_bytes();
        if let Some(source) = self.sectors.source_mut() {
            source.write_at(0, &header)?;
            source.set_len(total)?;
            source.flush()?;
        }

        info!("Committed {} sectors ({} bytes on disk)", written, total);
        Ok(())
    }

    /// Write a complete standalone image: placeholder first sector, every
    /// arena sector, then the real header over the placeholder
    pub(crate) fn save_to<W: Write + Seek>(&mut self, writer: &mut W) -> Result<()> {
        self.check_open()?;
        self.commit_directory()?;

        let sector_size = self.sectors.sector_size();
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&vec![0u8; sector_size])?;
        self.sectors.write_all_to(writer)?;

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&self.header.to_bytes())?;
        writer.flush()?;

        debug!("Saved {} sectors", self.sectors.len());
        Ok(())
    }

    fn source_is(&self, path: &Path) -> bool {
        let Some(current) = self.sectors.source_path() else {
            return false;
        };
        match (current.canonicalize(), path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn save_as(&mut self, path: &Path) -> Result<()> {
        self.check_open()?;

        if self.source_is(path) {
            if self.update_mode == UpdateMode::Update {
                return Err(CompoundError::InvalidOperation(format!(
                    "{} backs this file, use commit instead",
                    path.display()
                )));
            }

            // Still reading lazily from this file: render fully before
            // truncating it
            let mut image = Cursor::new(Vec::new());
            self.save_to(&mut image)?;
            std::fs::write(path, image.into_inner())?;
        } else {
            let mut writer = BufWriter::new(File::create(path)?);
            self.save_to(&mut writer)?;
        }

        info!("Saved compound file to {:?}", path);
        Ok(())
    }

    /// Fails once the slot behind a handle was freed or handed to a new
    /// entry
    pub(crate) fn check_handle(&self, sid: u32, generation: u32) -> Result<()> {
        self.check_open()?;
        if self.directory.get(sid)?.generation == generation {
            Ok(())
        } else {
            Err(CompoundError::ItemNotFound(format!(
                "entry {} no longer exists",
                sid
            )))
        }
    }

    fn check_container(&self, sid: u32) -> Result<()> {
        self.check_open()?;
        let entry = self.directory.get(sid)?;
        if entry.storage_type.is_container() {
            Ok(())
        } else {
            Err(CompoundError::ItemNotFound(format!(
                "storage {} no longer exists",
                sid
            )))
        }
    }

    pub(crate) fn check_stream(&self, sid: u32) -> Result<()> {
        self.check_open()?;
        let entry = self.directory.get(sid)?;
        if entry.storage_type == StorageType::Stream {
            Ok(())
        } else {
            Err(CompoundError::ItemNotFound(format!(
                "stream {} no longer exists",
                sid
            )))
        }
    }

    /// Create a child of `storage`. A name clash undoes the SID allocation.
    pub(crate) fn add_entry(
        &mut self,
        storage: u32,
        name: &str,
        storage_type: StorageType,
    ) -> Result<u32> {
        self.check_container(storage)?;
        let name = EntryName::new(name)?;

        let sid = self.directory.try_new_entry(name.into_units(), storage_type);
        if let Err(e) = self.directory.insert_child(storage, sid) {
            self.directory.rollback(sid);
            return Err(e);
        }

        debug!("Added {:?} SID {} under SID {}", storage_type, sid, storage);
        Ok(sid)
    }

    pub(crate) fn find_entry(&self, storage: u32, name: &str) -> Result<Option<u32>> {
        self.check_container(storage)?;
        let name = EntryName::new(name)?;
        self.directory.find_child(storage, name.as_units())
    }

    /// Remove a child of `storage` and everything below it, releasing the
    /// data of every stream in the subtree
    pub(crate) fn delete_entry(&mut self, storage: u32, name: &str) -> Result<()> {
        let sid = self
            .find_entry(storage, name)?
            .ok_or_else(|| CompoundError::ItemNotFound(name.to_string()))?;

        self.directory.remove_child(storage, sid)?;

        let mut doomed = vec![sid];
        let mut index = 0;
        while index < doomed.len() {
            let current = doomed[index];
            if self.directory.get(current)?.storage_type.is_container() {
                doomed.extend(self.directory.children(current)?);
            }
            index += 1;
        }

        for &current in doomed.iter().rev() {
            let entry = self.directory.get(current)?;
            if entry.storage_type == StorageType::Stream && entry.size > 0 {
                self.free_data(current)?;
            }
            self.directory.reset(current);
        }

        debug!("Deleted '{}' ({} entries)", name, doomed.len());
        Ok(())
    }

    pub(crate) fn rename_entry(&mut self, storage: u32, old: &str, new: &str) -> Result<()> {
        let new_name = EntryName::new(new)?;
        let sid = self
            .find_entry(storage, old)?
            .ok_or_else(|| CompoundError::ItemNotFound(old.to_string()))?;

        if let Some(existing) = self.directory.find_child(storage, new_name.as_units())? {
            if existing != sid {
                return Err(CompoundError::DuplicatedItem(format!(
                    "'{}' already exists",
                    new
                )));
            }
        }

        self.directory.get_mut(sid)?.name = new_name.into_units();
        self.directory.rebuild_tree(storage)
    }

    /// Storage whose child tree holds `sid`
    fn parent_of(&self, sid: u32) -> Result<Option<u32>> {
        for entry in self.directory.entries() {
            if entry.storage_type.is_container()
                && self.directory.children(entry.sid)?.contains(&sid)
            {
                return Ok(Some(entry.sid));
            }
        }
        Ok(None)
    }

    /// Release sectors and directory; idempotent
    pub(crate) fn close(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let source = self.sectors.take_source();
        self.sectors.clear();
        self.directory.clear();

        if self.config.leave_open {
            self.parked_source = source.map(CompoundSource::into_inner);
        }
        info!("Closed compound file");
    }
}

/// A failed [`CompoundFile::try_from_stream`]
#[derive(thiserror::Error)]
#[error("{error}")]
pub struct OpenError {
    #[source]
    pub error: CompoundError,
    /// The caller's stream, returned when `leave_open` was set
    pub stream: Option<Box<dyn SourceStream>>,
}

impl std::fmt::Debug for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenError")
            .field("error", &self.error)
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Snapshot of the header fields worth showing to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub version: Version,
    pub sector_size: usize,
    pub sector_count: usize,
    pub fat_sectors: u32,
    pub difat_sectors: u32,
    pub mini_fat_sectors: u32,
    pub directory_entries: usize,
    pub mini_stream_cutoff: u32,
    pub clsid: Clsid,
}

/// A compound file, in memory or backed by a file or stream
///
/// # Examples
///
/// ```rust,no_run
/// use compound_rs::{CompoundFile, Result};
///
/// # fn main() -> Result<()> {
/// let cf = CompoundFile::new();
/// let stream = cf.root_storage().add_stream("Contents")?;
/// stream.set_data(b"Hello, World!")?;
/// cf.save_as("hello.cfb")?;
///
/// let cf = CompoundFile::open("hello.cfb")?;
/// let data = cf.root_storage().get_stream("Contents")?.get_data()?;
/// assert_eq!(data, b"Hello, World!");
/// # Ok(())
/// # }
/// ```
pub struct CompoundFile {
    state: Arc<Mutex<CompoundState>>,
}

impl CompoundFile {
    /// Empty version 3 file with default configuration
    pub fn new() -> Self {
        Self::with_options(Version::V3, Configuration::default())
    }

    pub fn with_options(version: Version, config: Configuration) -> Self {
        debug!("Creating empty v{} compound file", version as u16);
        CompoundFile::from_state(CompoundState::create(version, config))
    }

    /// Open a file read-only with default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, UpdateMode::ReadOnly, Configuration::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        update_mode: UpdateMode,
        config: Configuration,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening compound file {:?} ({:?})", path, update_mode);
        let source = CompoundSource::open(path, update_mode == UpdateMode::Update)?;
        let state =
            CompoundState::load(source, update_mode, config).map_err(|(error, _)| error)?;
        Ok(CompoundFile::from_state(state))
    }

    /// Load from any seekable stream. In update mode `commit` writes back
    /// into it.
    pub fn from_stream<S: SourceStream + 'static>(
        stream: S,
        update_mode: UpdateMode,
        config: Configuration,
    ) -> Result<Self> {
        Self::try_from_stream(stream, update_mode, config).map_err(|failure| failure.error)
    }

    /// Like [`CompoundFile::from_stream`], but with `leave_open` set a
    /// failed load hands the stream back inside the error.
    pub fn try_from_stream<S: SourceStream + 'static>(
        stream: S,
        update_mode: UpdateMode,
        config: Configuration,
    ) -> std::result::Result<Self, OpenError> {
        info!("Opening compound file from stream ({:?})", update_mode);
        let leave_open = config.leave_open;
        let source = CompoundSource::new(Box::new(stream));

        match CompoundState::load(source, update_mode, config) {
            Ok(state) => Ok(CompoundFile::from_state(state)),
            Err((error, source)) => {
                let stream = if leave_open {
                    source.map(CompoundSource::into_inner)
                } else {
                    None
                };
                Err(OpenError { error, stream })
            }
        }
    }

    fn from_state(state: CompoundState) -> Self {
        CompoundFile {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn root_storage(&self) -> CfStorage {
        // The root slot is never freed
        CfStorage::new(Arc::clone(&self.state), 0, 0)
    }

    /// Write changes back to the backing medium (update mode only)
    pub fn commit(&self) -> Result<()> {
        self.state.lock().commit(false)
    }

    /// Like `commit`, then drop every sector from memory
    pub fn commit_release_memory(&self) -> Result<()> {
        self.state.lock().commit(true)
    }

    /// Write a complete image to `writer`
    pub fn save<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        self.state.lock().save_to(writer)
    }

    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.state.lock().save_as(path.as_ref())
    }

    /// Release everything. Handles fail with `Disposed` afterwards.
    pub fn close(&self) {
        self.state.lock().close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().disposed
    }

    /// The backing stream parked by `leave_open` once the file is closed
    pub fn take_source(&self) -> Option<Box<dyn SourceStream>> {
        self.state.lock().parked_source.take()
    }

    pub fn version(&self) -> Result<Version> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.header.version())
    }

    pub fn configuration(&self) -> Configuration {
        self.state.lock().config
    }

    pub fn header_info(&self) -> Result<HeaderInfo> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(HeaderInfo {
            version: state.header.version(),
            sector_size: state.sectors.sector_size(),
            sector_count: state.sectors.len(),
            fat_sectors: state.header.fat_sectors_count,
            difat_sectors: state.header.difat_sectors_count,
            mini_fat_sectors: state.header.mini_fat_sectors_count,
            directory_entries: state.directory.len(),
            mini_stream_cutoff: state.header.mini_stream_cutoff,
            clsid: Clsid(state.header.clsid),
        })
    }

    /// Every live entry named exactly `name`, anywhere in the hierarchy
    pub fn all_named_entries(&self, name: &str) -> Result<Vec<Item>> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let state = self.state.lock();
        state.check_open()?;

        Ok(state
            .directory
            .entries()
            .iter()
            .filter(|entry| !entry.is_invalid() && entry.name == units)
            .map(|entry| Item::from_entry(&self.state, entry))
            .collect())
    }

    /// Number of directory records, invalid slots included
    pub fn num_directories(&self) -> Result<usize> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.directory.len())
    }

    pub fn name_dir_entry(&self, sid: u32) -> Result<String> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.directory.get(sid)?.name_string())
    }

    pub fn storage_type(&self, sid: u32) -> Result<StorageType> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.directory.get(sid)?.storage_type)
    }

    /// Raw data of any entry. SID 0 returns the ministream.
    pub fn data_by_sid(&self, sid: u32) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.get_data(sid)
    }

    pub fn clsid_by_sid(&self, sid: u32) -> Result<Clsid> {
        let state = self.state.lock();
        state.check_open()?;
        Ok(state.directory.get(sid)?.clsid)
    }

    /// CLSID of the nearest enclosing storage that carries one, nil if
    /// none does
    pub fn clsid_for_stream(&self, sid: u32) -> Result<Clsid> {
        let state = self.state.lock();
        state.check_open()?;

        let mut current = state.parent_of(sid)?;
        let mut hops = 0;
        while let Some(storage) = current {
            let clsid = state.directory.get(storage)?.clsid;
            if !clsid.is_nil() {
                return Ok(clsid);
            }
            hops += 1;
            if hops > state.directory.len() {
                break;
            }
            current = state.parent_of(storage)?;
        }

        Ok(Clsid::default())
    }

    /// Rewrite the file at `path` without free sectors or dead entries
    pub fn shrink_file<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        info!("Shrinking {:?}", path);
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::shrink_stream(&mut file)
    }

    /// Rebuild the compound file held in `stream` by copying every live
    /// storage and stream into a fresh file, then replace the content.
    /// Version 3 only.
    pub fn shrink_stream<S: SourceStream>(stream: &mut S) -> Result<()> {
        stream.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let before = bytes.len();

        let source = CompoundFile::from_stream(
            Cursor::new(bytes),
            UpdateMode::ReadOnly,
            Configuration::default(),
        )?;
        let version = source.version()?;
        if version != Version::V3 {
            return Err(CompoundError::InvalidOperation(
                "only version 3 files can be shrunk".to_string(),
            ));
        }

        let target = CompoundFile::with_options(version, Configuration::default());
        {
            let mut from = source.state.lock();
            let mut to = target.state.lock();
            copy_tree(&mut from, &mut to)?;
        }

        let mut image = Cursor::new(Vec::new());
        target.save(&mut image)?;
        let image = image.into_inner();

        stream.seek(SeekFrom::Start(0))?;
        stream.write_all(&image)?;
        stream.set_len(image.len() as u64)?;
        stream.flush()?;

        info!("Shrunk compound file from {} to {} bytes", before, image.len());
        Ok(())
    }
}

/// Copy every live entry below the root of `from` into `to`
fn copy_tree(from: &mut CompoundState, to: &mut CompoundState) -> Result<()> {
    let root = from.directory.root()?;
    let (clsid, state_bits) = (root.clsid, root.state_bits);
    {
        let target_root = to.directory.root_mut()?;
        target_root.clsid = clsid;
        target_root.state_bits = state_bits;
    }
    to.header.clsid = from.header.clsid;

    let mut pending = vec![(0u32, 0u32)];
    while let Some((source_storage, target_storage)) = pending.pop() {
        for sid in from.directory.children(source_storage)? {
            let entry = from.directory.get(sid)?.clone();
            if entry.is_invalid() {
                warn!("Skipping invalid entry {} during shrink", sid);
                continue;
            }

            let new_sid = to.add_entry(target_storage, &entry.name_string(), entry.storage_type)?;
            {
                let copy = to.directory.get_mut(new_sid)?;
                copy.clsid = entry.clsid;
                copy.state_bits = entry.state_bits;
                copy.creation_time = entry.creation_time;
                copy.modified_time = entry.modified_time;
            }

            match entry.storage_type {
                StorageType::Stream => {
                    let data = from.get_data(sid)?;
                    to.set_data(new_sid, &data)?;
                }
                _ => pending.push((sid, new_sid)),
            }
        }
    }

    Ok(())
}

impl Default for CompoundFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompoundFile {
    fn drop(&mut self) {
        self.state.lock().close();
    }
}

impl std::fmt::Debug for CompoundFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompoundFile")
            .field("version", &state.header.version())
            .field("update_mode", &state.update_mode)
            .field("sectors", &state.sectors)
            .field("entries", &state.directory.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
