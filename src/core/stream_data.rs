//! Stream payload reads, writes and resizes
//!
//! A stream's bytes live in mini sectors while its size is below the
//! header's mini cutoff and in normal sectors otherwise. Crossing the
//! cutoff moves the data between the two allocators.

use crate::allocator::ChainKind;
use crate::compound_file::CompoundState;
use crate::error::{CompoundError, Result};
use crate::sector::{SectorType, ENDOFCHAIN, FREESECT, MINI_SECTOR_SIZE};
use crate::stream_view::{MiniDevice, NormalDevice, StreamView};
use std::collections::VecDeque;
use tracing::debug;

/// Copy chunk when moving data into the ministream
const TO_MINI_CHUNK: usize = 4096;

/// Copy chunk when moving data out of the ministream
const TO_NORMAL_CHUNK: usize = 256;

fn has_chain(start: u32) -> bool {
    start != ENDOFCHAIN && start != FREESECT
}

impl CompoundState {
    /// Whether data of `size` bytes belongs in the ministream. The root
    /// entry's data is the ministream itself and is always normal.
    pub(crate) fn uses_mini(&self, sid: u32, size: u64) -> bool {
        sid != 0 && size < u64::from(self.header.mini_stream_cutoff)
    }

    fn extent(&self, sid: u32) -> Result<(u32, u64)> {
        let entry = self.directory.get(sid)?;
        Ok((entry.start_sector, entry.size))
    }

    /// View over `sid`'s data, with the ministream when the data is mini
    fn data_view(&mut self, sid: u32) -> Result<(StreamView, Option<StreamView>)> {
        let (start, size) = self.extent(sid)?;
        let mini = self.uses_mini(sid, size);

        let ministream = if mini {
            Some(self.ministream_view()?)
        } else {
            None
        };

        let chain = if size == 0 || !has_chain(start) {
            Vec::new()
        } else if mini {
            self.sector_chain(start, ChainKind::Mini)?
        } else {
            self.sector_chain(start, ChainKind::Normal)?
        };

        Ok((StreamView::new(chain, size), ministream))
    }

    pub(crate) fn read_data(&mut self, sid: u32, position: u64, buf: &mut [u8]) -> Result<usize> {
        let (mut view, mut ministream) = self.data_view(sid)?;
        view.seek(position);

        match ministream.as_mut() {
            Some(ministream) => view.read(&mut MiniDevice::new(&mut self.sectors, ministream), buf),
            None => view.read(&mut NormalDevice::new(&mut self.sectors, SectorType::Normal), buf),
        }
    }

    /// The whole payload of `sid`
    pub(crate) fn get_data(&mut self, sid: u32) -> Result<Vec<u8>> {
        let (mut view, mut ministream) = self.data_view(sid)?;
        let unit = if ministream.is_some() {
            MINI_SECTOR_SIZE as u64
        } else {
            self.sectors.sector_size() as u64
        };

        // Never trust the declared size beyond what the chain holds
        let readable = view.len().min(view.chain().len() as u64 * unit);
        let readable = usize::try_from(readable).map_err(|_| {
            CompoundError::InvalidOperation(format!("{} bytes do not fit in memory", readable))
        })?;

        let mut data = vec![0u8; readable];
        let n = match ministream.as_mut() {
            Some(ministream) => {
                view.read(&mut MiniDevice::new(&mut self.sectors, ministream), &mut data)?
            }
            None => view.read(
                &mut NormalDevice::new(&mut self.sectors, SectorType::Normal),
                &mut data,
            )?,
        };
        data.truncate(n);

        Ok(data)
    }

    /// Overwrite bytes inside the current size of `sid`
    fn write_in_place(&mut self, sid: u32, position: u64, data: &[u8]) -> Result<()> {
        let (mut view, mut ministream) = self.data_view(sid)?;
        let before = view.chain().len();
        view.seek(position);

        match ministream.as_mut() {
            Some(ministream) => {
                view.write(&mut MiniDevice::new(&mut self.sectors, ministream), data)?
            }
            None => view.write(
                &mut NormalDevice::new(&mut self.sectors, SectorType::Normal),
                data,
            )?,
        }

        // Chain was shorter than the declared size (lenient load)
        if view.chain().len() != before {
            match ministream.as_ref() {
                Some(ministream) => self.allocate_mini_chain(view.chain(), ministream)?,
                None => self.allocate_sector_chain(view.chain())?,
            }
            self.directory.get_mut(sid)?.start_sector =
                view.chain().first().copied().unwrap_or(ENDOFCHAIN);
        }

        Ok(())
    }

    /// Write `data` at `position`, growing the stream when it ends past
    /// the current size
    pub(crate) fn write_data(&mut self, sid: u32, position: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let (_, size) = self.extent(sid)?;
        let end = position + data.len() as u64;
        if end > size {
            self.set_stream_length(sid, end)?;
        }

        self.write_in_place(sid, position, data)
    }

    /// Replace the whole payload of `sid`
    pub(crate) fn set_data(&mut self, sid: u32, data: &[u8]) -> Result<()> {
        let (_, size) = self.extent(sid)?;
        let length = data.len() as u64;

        // Old bytes are about to be overwritten, skip the transition copy
        if self.uses_mini(sid, size) != self.uses_mini(sid, length) {
            self.free_data(sid)?;
        }

        self.set_stream_length(sid, length)?;
        self.write_in_place(sid, 0, data)
    }

    /// Release every sector of `sid` and make it empty
    pub(crate) fn free_data(&mut self, sid: u32) -> Result<()> {
        let (start, size) = self.extent(sid)?;
        let erase = self.config.erase_free_sectors;

        if size > 0 && has_chain(start) {
            if self.uses_mini(sid, size) {
                let chain = self.sector_chain(start, ChainKind::Mini)?;
                self.free_mini_chain(&chain, 0, erase)?;
            } else {
                let chain = self.sector_chain(start, ChainKind::Normal)?;
                self.free_chain(&chain, 0, erase)?;
            }
        }

        let entry = self.directory.get_mut(sid)?;
        entry.start_sector = ENDOFCHAIN;
        entry.size = 0;
        Ok(())
    }

    /// Resize `sid` to `length` bytes. New bytes read as zero.
    pub(crate) fn set_stream_length(&mut self, sid: u32, length: u64) -> Result<()> {
        let (start, size) = self.extent(sid)?;
        if size == length {
            return Ok(());
        }

        let was_mini = self.uses_mini(sid, size);
        let now_mini = self.uses_mini(sid, length);

        if size > 0 && has_chain(start) && was_mini != now_mini {
            return self.transition(sid, size, length, now_mini);
        }

        if now_mini {
            self.resize_mini(sid, length)
        } else {
            self.resize_normal(sid, length)
        }
    }

    /// Move data across the mini cutoff: copy out, free, reallocate in
    /// the other allocator, copy back
    fn transition(&mut self, sid: u32, size: u64, length: u64, to_mini: bool) -> Result<()> {
        // One side of a transition is always below the cutoff
        let mut data = vec![0u8; size.min(length) as usize];
        let n = self.read_data(sid, 0, &mut data)?;
        data.truncate(n);

        self.free_data(sid)?;
        if to_mini {
            self.resize_mini(sid, length)?;
        } else {
            self.resize_normal(sid, length)?;
        }

        let chunk = if to_mini { TO_MINI_CHUNK } else { TO_NORMAL_CHUNK };
        for (i, piece) in data.chunks(chunk).enumerate() {
            self.write_in_place(sid, (i * chunk) as u64, piece)?;
        }

        debug!(
            "Moved SID {} {} the ministream ({} -> {} bytes)",
            sid,
            if to_mini { "into" } else { "out of" },
            size,
            length
        );
        Ok(())
    }

    fn free_queue(&mut self, kind: ChainKind) -> Result<VecDeque<u32>> {
        if self.config.sector_recycle {
            self.find_free_sectors(kind)
        } else {
            Ok(VecDeque::new())
        }
    }

    fn resize_normal(&mut self, sid: u32, length: u64) -> Result<()> {
        let (start, size) = self.extent(sid)?;
        let sector_size = self.sectors.sector_size() as u64;
        let chain = if size > 0 && has_chain(start) {
            self.sector_chain(start, ChainKind::Normal)?
        } else {
            Vec::new()
        };

        if length > size {
            let free = self.free_queue(ChainKind::Normal)?;
            let capacity = chain.len() as u64 * sector_size;
            let mut view = StreamView::new(chain, size).with_free_sectors(free);
            {
                let mut device = NormalDevice::new(&mut self.sectors, SectorType::Normal);
                view.set_len(&mut device, length)?;

                // Bytes left over in the last sector by an earlier shrink
                let stale = capacity.min(length).saturating_sub(size);
                if stale > 0 {
                    view.seek(size);
                    view.write(&mut device, &vec![0u8; stale as usize])?;
                }
            }
            self.allocate_sector_chain(view.chain())?;

            let entry = self.directory.get_mut(sid)?;
            entry.start_sector = view.chain().first().copied().unwrap_or(ENDOFCHAIN);
            entry.size = length;
        } else {
            let keep = length.div_ceil(sector_size) as usize;
            self.free_chain(&chain, keep, self.config.erase_free_sectors)?;

            let entry = self.directory.get_mut(sid)?;
            if keep == 0 {
                entry.start_sector = ENDOFCHAIN;
            }
            entry.size = length;
        }

        debug!("Resized SID {} from {} to {} bytes", sid, size, length);
        Ok(())
    }

    fn resize_mini(&mut self, sid: u32, length: u64) -> Result<()> {
        let (start, size) = self.extent(sid)?;
        let mini_size = MINI_SECTOR_SIZE as u64;
        let chain = if size > 0 && has_chain(start) {
            self.sector_chain(start, ChainKind::Mini)?
        } else {
            Vec::new()
        };

        if length > size {
            let free = self.free_queue(ChainKind::Mini)?;
            let capacity = chain.len() as u64 * mini_size;
            let mut ministream = self.ministream_view()?;
            let mut view = StreamView::new(chain, size).with_free_sectors(free);
            {
                let mut device = MiniDevice::new(&mut self.sectors, &mut ministream);
                view.set_len(&mut device, length)?;

                let stale = capacity.min(length).saturating_sub(size);
                if stale > 0 {
                    view.seek(size);
                    view.write(&mut device, &vec![0u8; stale as usize])?;
                }
            }
            self.allocate_mini_chain(view.chain(), &ministream)?;

            let entry = self.directory.get_mut(sid)?;
            entry.start_sector = view.chain().first().copied().unwrap_or(ENDOFCHAIN);
            entry.size = length;
        } else {
            let keep = length.div_ceil(mini_size) as usize;
            self.free_mini_chain(&chain, keep, self.config.erase_free_sectors)?;

            let entry = self.directory.get_mut(sid)?;
            if keep == 0 {
                entry.start_sector = ENDOFCHAIN;
            }
            entry.size = length;
        }

        debug!("Resized mini SID {} from {} to {} bytes", sid, size, length);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Version};
    use crate::directory::StorageType;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn state_with_stream(config: Configuration) -> (CompoundState, u32) {
        let mut state = CompoundState::create(Version::V3, config);
        let sid = state.add_entry(0, "Data", StorageType::Stream).unwrap();
        (state, sid)
    }

    #[test]
    fn test_below_cutoff_is_mini() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(4095)).unwrap();

        assert!(state.uses_mini(sid, 4095));
        assert_eq!(state.header.mini_fat_sectors_count, 1);
        assert_eq!(state.directory.root().unwrap().size, 4096);
        assert_eq!(state.get_data(sid).unwrap(), pattern(4095));
    }

    #[test]
    fn test_at_cutoff_is_normal() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(4096)).unwrap();

        assert!(!state.uses_mini(sid, 4096));
        assert_eq!(state.header.mini_fat_sectors_count, 0);
        let chain = state
            .sector_chain(state.directory.get(sid).unwrap().start_sector, ChainKind::Normal)
            .unwrap();
        assert_eq!(chain.len(), 8);
        assert_eq!(state.get_data(sid).unwrap(), pattern(4096));
    }

    #[test]
    fn test_grow_across_cutoff_keeps_bytes() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(4000)).unwrap();
        state.set_stream_length(sid, 6000).unwrap();

        let data = state.get_data(sid).unwrap();
        assert_eq!(data.len(), 6000);
        assert_eq!(&data[..4000], &pattern(4000)[..]);
        assert!(data[4000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_shrink_across_cutoff_keeps_prefix() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(5000)).unwrap();
        state.set_stream_length(sid, 4095).unwrap();

        assert_eq!(state.get_data(sid).unwrap(), pattern(4095));
        assert!(state.uses_mini(sid, 4095));
    }

    #[test]
    fn test_append_crosses_cutoff() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        let data = pattern(4500);
        state.write_data(sid, 0, &data[..4000]).unwrap();
        state.write_data(sid, 4000, &data[4000..]).unwrap();

        assert_eq!(state.directory.get(sid).unwrap().size, 4500);
        assert_eq!(state.get_data(sid).unwrap(), data);
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.write_data(sid, 10, b"ab").unwrap();

        let data = state.get_data(sid).unwrap();
        assert_eq!(data.len(), 12);
        assert!(data[..10].iter().all(|&b| b == 0));
        assert_eq!(&data[10..], b"ab");
    }

    #[test]
    fn test_regrow_after_shrink_reads_zeros() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &[0xAA; 1000]).unwrap();
        state.set_stream_length(sid, 10).unwrap();
        state.set_stream_length(sid, 1000).unwrap();

        let data = state.get_data(sid).unwrap();
        assert!(data[..10].iter().all(|&b| b == 0xAA));
        assert!(data[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_at_offset() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(300)).unwrap();

        let mut buf = [0u8; 50];
        assert_eq!(state.read_data(sid, 100, &mut buf).unwrap(), 50);
        assert_eq!(&buf[..], &pattern(300)[100..150]);
        assert_eq!(state.read_data(sid, 280, &mut buf).unwrap(), 20);
        assert_eq!(state.read_data(sid, 400, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_recycle_reuses_freed_sectors() {
        let config = Configuration::default().with_sector_recycle(true);
        let (mut state, sid) = state_with_stream(config);
        state.set_data(sid, &pattern(5000)).unwrap();
        let sectors = state.sectors.len();

        state.free_data(sid).unwrap();
        let other = state.add_entry(0, "Other", StorageType::Stream).unwrap();
        state.set_data(other, &pattern(5000)).unwrap();

        assert_eq!(state.sectors.len(), sectors);
        assert_eq!(state.get_data(other).unwrap(), pattern(5000));
    }

    #[test]
    fn test_without_recycle_file_grows() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(5000)).unwrap();
        let sectors = state.sectors.len();

        state.free_data(sid).unwrap();
        let other = state.add_entry(0, "Other", StorageType::Stream).unwrap();
        state.set_data(other, &pattern(5000)).unwrap();

        assert!(state.sectors.len() > sectors);
    }

    #[test]
    fn test_erase_free_sectors_zeroes_payload() {
        let config = Configuration::default().with_erase_free_sectors(true);
        let (mut state, sid) = state_with_stream(config);
        state.set_data(sid, &[0xAA; 5000]).unwrap();
        let start = state.directory.get(sid).unwrap().start_sector;
        let chain = state.sector_chain(start, ChainKind::Normal).unwrap();

        state.free_data(sid).unwrap();
        for id in chain {
            assert!(state.sectors.get(id).unwrap().data.iter().all(|&b| b == 0));
        }
        let entry = state.directory.get(sid).unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.start_sector, ENDOFCHAIN);
    }

    #[test]
    fn test_truncate_to_zero_releases_chain() {
        let (mut state, sid) = state_with_stream(Configuration::default());
        state.set_data(sid, &pattern(5000)).unwrap();
        state.set_stream_length(sid, 0).unwrap();

        let entry = state.directory.get(sid).unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.start_sector, ENDOFCHAIN);
        assert!(state.get_data(sid).unwrap().is_empty());
    }
}
