//! Contiguous byte-stream view over a sector chain
//!
//! A `StreamView` only knows the ordered sector ids of a chain and a
//! logical length. The bytes live behind a `SectorDevice`: the sector
//! arena for normal chains, or the ministream for mini chains. Growing a
//! view pulls sectors from its free queue first, then asks the device for
//! fresh ones. Ids are handed out immediately; linking them in the FAT or
//! MiniFAT is the allocator's job.

use crate::error::{CompoundError, Result};
use crate::sector::{SectorType, MINI_SECTOR_SIZE};
use crate::sector_collection::SectorCollection;
use std::collections::VecDeque;

/// Fixed-size block storage addressed by sector id
pub trait SectorDevice {
    fn sector_size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` inside sector `id`
    fn read_sector(&mut self, id: u32, offset: usize, buf: &mut [u8]) -> Result<()>;

    fn write_sector(&mut self, id: u32, offset: usize, data: &[u8]) -> Result<()>;

    /// Create a new sector and return its id
    fn new_sector(&mut self) -> Result<u32>;

    /// Prepare a recycled free sector for reuse
    fn reuse_sector(&mut self, id: u32) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct StreamView {
    chain: Vec<u32>,
    length: u64,
    position: u64,
    free_sectors: VecDeque<u32>,
}

impl StreamView {
    pub fn new(chain: Vec<u32>, length: u64) -> Self {
        StreamView {
            chain,
            length,
            position: 0,
            free_sectors: VecDeque::new(),
        }
    }

    /// Sectors to consume before allocating new ones
    pub fn with_free_sectors(mut self, free_sectors: VecDeque<u32>) -> Self {
        self.free_sectors = free_sectors;
        self
    }

    pub fn chain(&self) -> &[u32] {
        &self.chain
    }

    pub fn into_chain(self) -> Vec<u32> {
        self.chain
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Bytes addressable without growing the chain
    pub fn capacity<D: SectorDevice>(&self, device: &D) -> u64 {
        self.chain.len() as u64 * device.sector_size() as u64
    }

    /// Grow the chain until it can hold `bytes`
    pub fn ensure_capacity<D: SectorDevice>(&mut self, device: &mut D, bytes: u64) -> Result<()> {
        let needed = bytes.div_ceil(device.sector_size() as u64) as usize;
        while self.chain.len() < needed {
            match self.free_sectors.pop_front() {
                Some(id) => {
                    device.reuse_sector(id)?;
                    self.chain.push(id);
                }
                None => {
                    let id = device.new_sector()?;
                    self.chain.push(id);
                }
            }
        }
        Ok(())
    }

    /// Change the logical length. Growing allocates sectors; shrinking
    /// keeps the chain as is and leaves reclamation to the caller.
    pub fn set_len<D: SectorDevice>(&mut self, device: &mut D, length: u64) -> Result<()> {
        if length > self.length {
            self.ensure_capacity(device, length)?;
        }
        self.length = length;
        Ok(())
    }

    /// Read from the current position, clamped to the logical length
    pub fn read<D: SectorDevice>(&mut self, device: &mut D, buf: &mut [u8]) -> Result<usize> {
        let sector_size = device.sector_size() as u64;
        let end = self.length.min(self.capacity(device));
        if self.position >= end {
            return Ok(0);
        }

        let count = (buf.len() as u64).min(end - self.position) as usize;
        let mut done = 0;
        while done < count {
            let index = (self.position / sector_size) as usize;
            let offset = (self.position % sector_size) as usize;
            let n = (sector_size as usize - offset).min(count - done);
            device.read_sector(self.chain[index], offset, &mut buf[done..done + n])?;
            done += n;
            self.position += n as u64;
        }

        Ok(count)
    }

    /// Write at the current position, growing the chain as needed
    pub fn write<D: SectorDevice>(&mut self, device: &mut D, data: &[u8]) -> Result<()> {
        let sector_size = device.sector_size() as u64;
        let end = self.position + data.len() as u64;
        self.ensure_capacity(device, end)?;

        let mut done = 0;
        while done < data.len() {
            let index = (self.position / sector_size) as usize;
            let offset = (self.position % sector_size) as usize;
            let n = (sector_size as usize - offset).min(data.len() - done);
            device.write_sector(self.chain[index], offset, &data[done..done + n])?;
            done += n;
            self.position += n as u64;
        }

        if end > self.length {
            self.length = end;
        }
        Ok(())
    }

    pub fn read_u32<D: SectorDevice>(&mut self, device: &mut D) -> Result<u32> {
        let mut bytes = [0u8; 4];
        let at = self.position;
        if self.read(device, &mut bytes)? != 4 {
            return Err(CompoundError::Corrupted(format!(
                "table entry at byte {} past end of table ({} bytes)",
                at, self.length
            )));
        }
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32<D: SectorDevice>(&mut self, device: &mut D, value: u32) -> Result<()> {
        self.write(device, &value.to_le_bytes())
    }

    /// Read the table entry for `index` (4-byte slots)
    pub fn entry<D: SectorDevice>(&mut self, device: &mut D, index: u32) -> Result<u32> {
        self.seek(index as u64 * 4);
        self.read_u32(device)
    }

    pub fn set_entry<D: SectorDevice>(&mut self, device: &mut D, index: u32, value: u32) -> Result<()> {
        self.seek(index as u64 * 4);
        self.write_u32(device, value)
    }
}

/// Full-size sectors of the arena
pub struct NormalDevice<'a> {
    sectors: &'a mut SectorCollection,
    sector_type: SectorType,
    fill: u8,
}

impl<'a> NormalDevice<'a> {
    pub fn new(sectors: &'a mut SectorCollection, sector_type: SectorType) -> Self {
        NormalDevice {
            sectors,
            sector_type,
            fill: sector_type.fill_byte(),
        }
    }

    /// Device for MiniFAT sectors: plain sectors that start out all FREESECT
    pub fn table(sectors: &'a mut SectorCollection) -> Self {
        NormalDevice {
            sectors,
            sector_type: SectorType::Normal,
            fill: 0xFF,
        }
    }

    pub fn sectors(&mut self) -> &mut SectorCollection {
        self.sectors
    }
}

impl SectorDevice for NormalDevice<'_> {
    fn sector_size(&self) -> usize {
        self.sectors.sector_size()
    }

    fn read_sector(&mut self, id: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        let sector = self.sectors.get(id)?;
        buf.copy_from_slice(&sector.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sector(&mut self, id: u32, offset: usize, data: &[u8]) -> Result<()> {
        let sector = self.sectors.get(id)?;
        sector.data[offset..offset + data.len()].copy_from_slice(data);
        sector.dirty = true;
        Ok(())
    }

    fn new_sector(&mut self) -> Result<u32> {
        let id = self.sectors.add(self.sector_type);
        if self.fill != self.sector_type.fill_byte() {
            self.sectors.get(id)?.data.fill(self.fill);
        }
        Ok(id)
    }

    fn reuse_sector(&mut self, id: u32) -> Result<()> {
        let sector = self.sectors.get(id)?;
        sector.data.fill(self.fill);
        sector.sector_type = self.sector_type;
        sector.dirty = true;
        Ok(())
    }
}

/// 64-byte mini-sectors packed into the ministream
pub struct MiniDevice<'a> {
    sectors: &'a mut SectorCollection,
    ministream: &'a mut StreamView,
}

impl<'a> MiniDevice<'a> {
    pub fn new(sectors: &'a mut SectorCollection, ministream: &'a mut StreamView) -> Self {
        MiniDevice {
            sectors,
            ministream,
        }
    }
}

impl SectorDevice for MiniDevice<'_> {
    fn sector_size(&self) -> usize {
        MINI_SECTOR_SIZE
    }

    fn read_sector(&mut self, id: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        let mut device = NormalDevice::new(self.sectors, SectorType::Normal);
        self.ministream
            .seek(id as u64 * MINI_SECTOR_SIZE as u64 + offset as u64);
        let n = self.ministream.read(&mut device, buf)?;
        if n != buf.len() {
            return Err(CompoundError::Corrupted(format!(
                "mini sector {} lies past the end of the ministream ({} bytes)",
                id,
                self.ministream.len()
            )));
        }
        Ok(())
    }

    fn write_sector(&mut self, id: u32, offset: usize, data: &[u8]) -> Result<()> {
        let mut device = NormalDevice::new(self.sectors, SectorType::Normal);
        self.ministream
            .seek(id as u64 * MINI_SECTOR_SIZE as u64 + offset as u64);
        self.ministream.write(&mut device, data)
    }

    fn new_sector(&mut self) -> Result<u32> {
        let id = self.ministream.len().div_ceil(MINI_SECTOR_SIZE as u64) as u32;
        self.write_sector(id, 0, &[0u8; MINI_SECTOR_SIZE])?;
        Ok(id)
    }

    fn reuse_sector(&mut self, id: u32) -> Result<()> {
        self.write_sector(id, 0, &[0u8; MINI_SECTOR_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory device with 8-byte sectors
    #[derive(Default)]
    struct MemoryDevice {
        sectors: Vec<[u8; 8]>,
        reused: Vec<u32>,
    }

    impl SectorDevice for MemoryDevice {
        fn sector_size(&self) -> usize {
            8
        }

        fn read_sector(&mut self, id: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
            buf.copy_from_slice(&self.sectors[id as usize][offset..offset + buf.len()]);
            Ok(())
        }

        fn write_sector(&mut self, id: u32, offset: usize, data: &[u8]) -> Result<()> {
            self.sectors[id as usize][offset..offset + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn new_sector(&mut self) -> Result<u32> {
            self.sectors.push([0; 8]);
            Ok(self.sectors.len() as u32 - 1)
        }

        fn reuse_sector(&mut self, id: u32) -> Result<()> {
            self.sectors[id as usize] = [0; 8];
            self.reused.push(id);
            Ok(())
        }
    }

    #[test]
    fn test_write_spans_sectors() {
        let mut device = MemoryDevice::default();
        let mut view = StreamView::default();

        view.write(&mut device, b"hello compound world").unwrap();
        assert_eq!(view.len(), 20);
        assert_eq!(view.chain(), &[0, 1, 2]);

        let mut buf = vec![0u8; 32];
        view.seek(6);
        let n = view.read(&mut device, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"compound world");
    }

    #[test]
    fn test_read_clamped_to_length() {
        let mut device = MemoryDevice::default();
        let mut view = StreamView::default();
        view.write(&mut device, &[7u8; 12]).unwrap();

        view.set_len(&mut device, 5).unwrap();
        assert_eq!(view.chain().len(), 2);

        let mut buf = [0u8; 12];
        view.seek(0);
        assert_eq!(view.read(&mut device, &mut buf).unwrap(), 5);
        view.seek(9);
        assert_eq!(view.read(&mut device, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_clamped_to_chain() {
        // Declared length longer than the chain can hold
        let mut device = MemoryDevice::default();
        device.new_sector().unwrap();
        let mut view = StreamView::new(vec![0], 100);

        let mut buf = [0u8; 100];
        assert_eq!(view.read(&mut device, &mut buf).unwrap(), 8);
    }

    #[test]
    fn test_growth_prefers_free_sectors() {
        let mut device = MemoryDevice::default();
        for _ in 0..4 {
            device.new_sector().unwrap();
        }
        device.sectors[2] = [9; 8];

        let mut view = StreamView::new(vec![], 0).with_free_sectors(VecDeque::from(vec![2, 3]));
        view.set_len(&mut device, 20).unwrap();

        assert_eq!(view.chain(), &[2, 3, 4]);
        assert_eq!(device.reused, vec![2, 3]);
        assert_eq!(device.sectors[2], [0; 8]);
    }

    #[test]
    fn test_u32_entries() {
        let mut device = MemoryDevice::default();
        let mut view = StreamView::default();

        view.set_entry(&mut device, 3, 0xDEAD_BEEF).unwrap();
        assert_eq!(view.len(), 16);
        assert_eq!(view.entry(&mut device, 3).unwrap(), 0xDEAD_BEEF);
        assert_eq!(view.entry(&mut device, 0).unwrap(), 0);

        let err = view.entry(&mut device, 4).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_normal_device_fill() {
        let mut sectors = SectorCollection::new(512, None);
        let mut device = NormalDevice::new(&mut sectors, SectorType::Fat);
        let mut view = StreamView::default();
        view.set_len(&mut device, 4).unwrap();
        assert_eq!(view.entry(&mut device, 0).unwrap(), crate::sector::FREESECT);

        let mut device = NormalDevice::table(&mut sectors);
        let mut view = StreamView::default();
        view.set_len(&mut device, 4).unwrap();
        assert_eq!(view.entry(&mut device, 0).unwrap(), crate::sector::FREESECT);
        assert_eq!(view.chain(), &[1]);
    }

    #[test]
    fn test_mini_device_packs_into_ministream() {
        let mut sectors = SectorCollection::new(512, None);
        let mut ministream = StreamView::default();

        let mut view = StreamView::default();
        {
            let mut device = MiniDevice::new(&mut sectors, &mut ministream);
            view.write(&mut device, &[5u8; 100]).unwrap();
        }

        assert_eq!(view.chain(), &[0, 1]);
        assert_eq!(ministream.len(), 128);
        assert_eq!(ministream.chain().len(), 1);

        let mut device = MiniDevice::new(&mut sectors, &mut ministream);
        let mut buf = [0u8; 100];
        view.seek(0);
        assert_eq!(view.read(&mut device, &mut buf).unwrap(), 100);
        assert!(buf.iter().all(|&b| b == 5));
    }
}
