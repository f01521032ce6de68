//! Segmented, lazily populated sector arena
//!
//! Sectors are kept in fixed-size slices so a multi-gigabyte file never
//! needs one huge contiguous allocation. Slots of a loaded file start out
//! empty and are read from the backing medium on first access.

use crate::error::{CompoundError, Result};
use crate::io::CompoundSource;
use crate::sector::{Sector, SectorType};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Sectors per slice
pub const SLICE_SIZE: usize = 4096;

pub struct SectorCollection {
    slices: Vec<Vec<Option<Sector>>>,
    len: usize,
    sector_size: usize,
    source: Option<CompoundSource>,

    /// Id reserved for the v4 range lock sector
    range_lock_id: Option<u32>,

    /// Range lock sector added but not yet marked in the FAT
    range_lock_pending: bool,
}

impl SectorCollection {
    /// Empty arena for a new file
    pub fn new(sector_size: usize, range_lock_id: Option<u32>) -> Self {
        SectorCollection {
            slices: Vec::new(),
            len: 0,
            sector_size,
            source: None,
            range_lock_id,
            range_lock_pending: false,
        }
    }

    /// Arena over `count` sectors of an existing medium
    pub fn with_source(
        sector_size: usize,
        source: CompoundSource,
        count: usize,
        range_lock_id: Option<u32>,
    ) -> Self {
        let mut slices = Vec::with_capacity(count.div_ceil(SLICE_SIZE));
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(SLICE_SIZE);
            let mut slice = Vec::with_capacity(SLICE_SIZE);
            slice.resize_with(n, || None);
            slices.push(slice);
            remaining -= n;
        }

        SectorCollection {
            slices,
            len: count,
            sector_size,
            source: Some(source),
            range_lock_id,
            range_lock_pending: false,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn source_mut(&mut self) -> Option<&mut CompoundSource> {
        self.source.as_mut()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_ref().and_then(CompoundSource::path)
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn take_source(&mut self) -> Option<CompoundSource> {
        self.source.take()
    }

    fn slot_mut(&mut self, id: u32) -> Option<&mut Option<Sector>> {
        let index = id as usize;
        self.slices
            .get_mut(index / SLICE_SIZE)
            .and_then(|slice| slice.get_mut(index % SLICE_SIZE))
    }

    /// Get a sector, loading it from the medium if needed
    pub fn get(&mut self, id: u32) -> Result<&mut Sector> {
        if id as usize >= self.len {
            return Err(CompoundError::Corrupted(format!(
                "sector {} out of range (arena holds {})",
                id, self.len
            )));
        }

        let sector_size = self.sector_size;
        let needs_load = matches!(self.slot_mut(id), Some(None));
        if needs_load {
            let data = match self.source.as_mut() {
                Some(source) => source.read_sector(id, sector_size)?,
                None => vec![0u8; sector_size],
            };
            if let Some(slot) = self.slot_mut(id) {
                *slot = Some(Sector::loaded(id, SectorType::Normal, data));
            }
        }

        match self.slot_mut(id) {
            Some(Some(sector)) => Ok(sector),
            _ => Err(CompoundError::Corrupted(format!("sector {} missing", id))),
        }
    }

    /// Append a fresh sector and return its id
    pub fn add(&mut self, sector_type: SectorType) -> u32 {
        if self.range_lock_id == Some(self.len as u32) {
            let id = self.push(SectorType::RangeLock);
            self.range_lock_pending = true;
            debug!("Reserved range lock sector {}", id);
        }

        self.push(sector_type)
    }

    fn push(&mut self, sector_type: SectorType) -> u32 {
        let id = self.len as u32;
        if self.len % SLICE_SIZE == 0 {
            self.slices.push(Vec::with_capacity(SLICE_SIZE));
        }
        let sector = Sector::new(id, self.sector_size, sector_type);
        if let Some(slice) = self.slices.last_mut() {
            slice.push(Some(sector));
        }
        self.len += 1;
        id
    }

    /// Range lock sector id still needing its ENDOFCHAIN mark, if any
    pub fn take_pending_range_lock(&mut self) -> Option<u32> {
        if self.range_lock_pending {
            self.range_lock_pending = false;
            self.range_lock_id
        } else {
            None
        }
    }

    /// Drop a clean sector from memory; it is reloaded on next access
    pub fn release(&mut self, id: u32) {
        if self.source.is_none() {
            return;
        }
        if let Some(slot) = self.slot_mut(id) {
            if matches!(slot, Some(sector) if !sector.dirty) {
                *slot = None;
            }
        }
    }

    /// Write every dirty sector back to the medium, coalescing adjacent
    /// sectors into single writes. Returns the number of sectors written.
    pub fn flush_dirty(&mut self, release: bool) -> Result<usize> {
        if self.source.is_none() {
            return Err(CompoundError::InvalidOperation(
                "no backing stream to flush to".to_string(),
            ));
        }

        let sector_size = self.sector_size;
        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut written = 0;

        for slice in self.slices.iter_mut() {
            for sector in slice.iter_mut().flatten() {
                if !sector.dirty {
                    continue;
                }
                match runs.last_mut() {
                    Some((start, buffer))
                        if *start as usize + buffer.len() / sector_size == sector.id as usize =>
                    {
                        buffer.extend_from_slice(&sector.data);
                    }
                    _ => runs.push((sector.id, sector.data.clone())),
                }
                sector.dirty = false;
                written += 1;
            }
        }

        if let Some(source) = self.source.as_mut() {
            for (start, buffer) in &runs {
                source.write_at((*start as u64 + 1) * sector_size as u64, buffer)?;
            }
        }
        debug!("Flushed {} sectors in {} runs", written, runs.len());

        if release {
            for id in 0..self.len as u32 {
                self.release(id);
            }
        }

        Ok(written)
    }

    /// Write every sector in id order, without caching unloaded ones
    pub fn write_all_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let sector_size = self.sector_size;
        for index in 0..self.len {
            let loaded = self
                .slices
                .get(index / SLICE_SIZE)
                .and_then(|slice| slice.get(index % SLICE_SIZE))
                .and_then(|slot| slot.as_ref());

            match loaded {
                Some(sector) => writer.write_all(&sector.data)?,
                None => {
                    let data = match self.source.as_mut() {
                        Some(source) => source.read_sector(index as u32, sector_size)?,
                        None => vec![0u8; sector_size],
                    };
                    writer.write_all(&data)?;
                }
            }
        }
        Ok(())
    }

    /// Drop every sector (used on close)
    pub fn clear(&mut self) {
        self.slices.clear();
        self.len = 0;
        self.range_lock_pending = false;
    }
}

impl std::fmt::Debug for SectorCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorCollection")
            .field("len", &self.len)
            .field("sector_size", &self.sector_size)
            .field("source", &self.source)
            .finish()
    }
}
