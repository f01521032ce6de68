//! Storage and stream handles
//!
//! Handles are cheap: a shared reference to the file state plus a SID
//! and the slot generation seen when the handle was made. Every call takes
//! the lock and fails with `Disposed` once the file is closed, or with
//! `ItemNotFound` once the entry was deleted.

use crate::compound_file::CompoundState;
use crate::directory::{Clsid, DirectoryEntry, EntryInfo, StorageType};
use crate::error::{CompoundError, Result};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::Arc;

type SharedState = Arc<Mutex<CompoundState>>;

/// A storage or a stream
#[derive(Debug, Clone)]
pub enum Item {
    Storage(CfStorage),
    Stream(CfStream),
}

impl Item {
    pub(crate) fn from_entry(state: &SharedState, entry: &DirectoryEntry) -> Self {
        match entry.storage_type {
            StorageType::Stream => {
                Item::Stream(CfStream::new(Arc::clone(state), entry.sid, entry.generation))
            }
            _ => Item::Storage(CfStorage::new(Arc::clone(state), entry.sid, entry.generation)),
        }
    }

    pub fn sid(&self) -> u32 {
        match self {
            Item::Storage(storage) => storage.sid,
            Item::Stream(stream) => stream.sid,
        }
    }

    pub fn name(&self) -> Result<String> {
        match self {
            Item::Storage(storage) => storage.name(),
            Item::Stream(stream) => stream.name(),
        }
    }

    pub fn info(&self) -> Result<EntryInfo> {
        match self {
            Item::Storage(storage) => storage.info(),
            Item::Stream(stream) => stream.info(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Item::Storage(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Item::Stream(_))
    }

    pub fn as_storage(&self) -> Option<&CfStorage> {
        match self {
            Item::Storage(storage) => Some(storage),
            Item::Stream(_) => None,
        }
    }

    pub fn as_stream(&self) -> Option<&CfStream> {
        match self {
            Item::Stream(stream) => Some(stream),
            Item::Storage(_) => None,
        }
    }
}

/// A storage (directory) inside a compound file
#[derive(Clone)]
pub struct CfStorage {
    state: SharedState,
    sid: u32,
    generation: u32,
}

impl CfStorage {
    pub(crate) fn new(state: SharedState, sid: u32, generation: u32) -> Self {
        CfStorage {
            state,
            sid,
            generation,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CompoundState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        state.check_handle(self.sid, self.generation)?;
        f(&mut *state)
    }

    fn entry_with<T>(&self, f: impl FnOnce(&DirectoryEntry) -> T) -> Result<T> {
        self.with_state(|state| Ok(f(state.directory.get(self.sid)?)))
    }

    pub fn sid(&self) -> u32 {
        self.sid
    }

    pub fn name(&self) -> Result<String> {
        self.entry_with(DirectoryEntry::name_string)
    }

    pub fn info(&self) -> Result<EntryInfo> {
        self.entry_with(|entry| EntryInfo::from(entry))
    }

    pub fn clsid(&self) -> Result<Clsid> {
        self.entry_with(|entry| entry.clsid)
    }

    pub fn set_clsid(&self, clsid: Clsid) -> Result<()> {
        self.with_state(|state| {
            state.directory.get_mut(self.sid)?.clsid = clsid;
            Ok(())
        })
    }

    pub fn state_bits(&self) -> Result<u32> {
        self.entry_with(|entry| entry.state_bits)
    }

    pub fn set_state_bits(&self, bits: u32) -> Result<()> {
        self.with_state(|state| {
            state.directory.get_mut(self.sid)?.state_bits = bits;
            Ok(())
        })
    }

    /// Create an empty stream
    ///
    /// # Errors
    ///
    /// `DuplicatedItem` if a child with the same name (case-insensitive)
    /// already exists, `InvalidName` for names over 31 characters or
    /// containing `\ / : !`.
    pub fn add_stream(&self, name: &str) -> Result<CfStream> {
        let (sid, generation) = self.add(name, StorageType::Stream)?;
        Ok(CfStream::new(Arc::clone(&self.state), sid, generation))
    }

    pub fn add_storage(&self, name: &str) -> Result<CfStorage> {
        let (sid, generation) = self.add(name, StorageType::Storage)?;
        Ok(CfStorage::new(Arc::clone(&self.state), sid, generation))
    }

    fn add(&self, name: &str, storage_type: StorageType) -> Result<(u32, u32)> {
        self.with_state(|state| {
            let sid = state.add_entry(self.sid, name, storage_type)?;
            Ok((sid, state.directory.get(sid)?.generation))
        })
    }

    /// SID and generation of the child `name` if it has type `wanted`
    fn find(&self, name: &str, wanted: StorageType) -> Result<Option<(u32, u32)>> {
        self.with_state(|state| {
            let Some(sid) = state.find_entry(self.sid, name)? else {
                return Ok(None);
            };
            let entry = state.directory.get(sid)?;
            Ok((entry.storage_type == wanted).then_some((sid, entry.generation)))
        })
    }

    pub fn try_get_stream(&self, name: &str) -> Result<Option<CfStream>> {
        Ok(self
            .find(name, StorageType::Stream)?
            .map(|(sid, generation)| CfStream::new(Arc::clone(&self.state), sid, generation)))
    }

    pub fn get_stream(&self, name: &str) -> Result<CfStream> {
        self.try_get_stream(name)?
            .ok_or_else(|| CompoundError::ItemNotFound(format!("stream '{}'", name)))
    }

    pub fn try_get_storage(&self, name: &str) -> Result<Option<CfStorage>> {
        Ok(self
            .find(name, StorageType::Storage)?
            .map(|(sid, generation)| CfStorage::new(Arc::clone(&self.state), sid, generation)))
    }

    pub fn get_storage(&self, name: &str) -> Result<CfStorage> {
        self.try_get_storage(name)?
            .ok_or_else(|| CompoundError::ItemNotFound(format!("storage '{}'", name)))
    }

    /// Delete a child; a storage goes with everything below it
    pub fn delete(&self, name: &str) -> Result<()> {
        self.with_state(|state| state.delete_entry(self.sid, name))
    }

    pub fn rename_item(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.with_state(|state| state.rename_entry(self.sid, old_name, new_name))
    }

    /// Direct children in directory order (shorter names first, then
    /// case-insensitive)
    pub fn children(&self) -> Result<Vec<Item>> {
        let state = self.state.lock();
        state.check_handle(self.sid, self.generation)?;
        let sids = state.directory.children(self.sid)?;
        sids.into_iter()
            .map(|sid| Ok(Item::from_entry(&self.state, state.directory.get(sid)?)))
            .collect()
    }

    pub fn child_count(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.directory.children(self.sid)?.len()))
    }

    /// Call `action` for every child, depth first when `recursive`. The
    /// lock is released before `action` runs, so it may use the handles.
    pub fn visit_entries<F: FnMut(&Item)>(&self, mut action: F, recursive: bool) -> Result<()> {
        let items = self.with_state(|state| {
            let mut items = Vec::new();
            let mut pending: Vec<u32> = state.directory.children(self.sid)?;
            pending.reverse();
            let mut visited = AHashSet::new();

            while let Some(sid) = pending.pop() {
                if !visited.insert(sid) {
                    continue;
                }
                let entry = state.directory.get(sid)?;
                items.push(Item::from_entry(&self.state, entry));

                if recursive && entry.storage_type.is_container() {
                    // Reversed so the stack pops them in directory order
                    pending.extend(state.directory.children(sid)?.into_iter().rev());
                }
            }
            Ok(items)
        })?;

        for item in &items {
            action(item);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CfStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfStorage").field("sid", &self.sid).finish()
    }
}

/// A stream (file) inside a compound file
#[derive(Clone)]
pub struct CfStream {
    state: SharedState,
    sid: u32,
    generation: u32,
}

impl CfStream {
    pub(crate) fn new(state: SharedState, sid: u32, generation: u32) -> Self {
        CfStream {
            state,
            sid,
            generation,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CompoundState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        state.check_handle(self.sid, self.generation)?;
        state.check_stream(self.sid)?;
        f(&mut *state)
    }

    pub fn sid(&self) -> u32 {
        self.sid
    }

    pub fn name(&self) -> Result<String> {
        self.with_state(|state| Ok(state.directory.get(self.sid)?.name_string()))
    }

    pub fn info(&self) -> Result<EntryInfo> {
        self.with_state(|state| Ok(EntryInfo::from(state.directory.get(self.sid)?)))
    }

    pub fn size(&self) -> Result<u64> {
        self.with_state(|state| Ok(state.directory.get(self.sid)?.size))
    }

    /// Replace the whole content
    pub fn set_data(&self, data: &[u8]) -> Result<()> {
        self.with_state(|state| state.set_data(self.sid, data))
    }

    pub fn append(&self, data: &[u8]) -> Result<()> {
        self.with_state(|state| {
            let size = state.directory.get(self.sid)?.size;
            state.write_data(self.sid, size, data)
        })
    }

    /// Write at `position`; a gap past the current end reads as zeros
    pub fn write(&self, data: &[u8], position: u64) -> Result<()> {
        self.with_state(|state| state.write_data(self.sid, position, data))
    }

    pub fn get_data(&self) -> Result<Vec<u8>> {
        self.with_state(|state| state.get_data(self.sid))
    }

    /// Read up to `count` bytes at `position` into `buffer`. Returns the
    /// number of bytes read, short at the end of the stream.
    pub fn read(&self, buffer: &mut [u8], position: u64, count: usize) -> Result<usize> {
        if count > buffer.len() {
            return Err(CompoundError::InvalidArgument(format!(
                "count {} exceeds buffer of {} bytes",
                count,
                buffer.len()
            )));
        }
        self.with_state(|state| state.read_data(self.sid, position, &mut buffer[..count]))
    }

    /// Grow (zero filled) or truncate
    pub fn resize(&self, length: u64) -> Result<()> {
        self.with_state(|state| state.set_stream_length(self.sid, length))
    }

    /// Replace the content with everything `reader` yields
    pub fn copy_from<R: Read>(&self, reader: &mut R) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.set_data(&data)
    }

    pub fn copy_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let data = self.get_data()?;
        writer.write_all(&data)?;
        Ok(data.len() as u64)
    }
}

impl std::fmt::Debug for CfStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfStream").field("sid", &self.sid).finish()
    }
}
