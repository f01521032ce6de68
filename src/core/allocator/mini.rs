//! MiniFAT allocation and the ministream

use crate::compound_file::CompoundState;
use crate::error::Result;
use crate::sector::{ENDOFCHAIN, FREESECT, MINI_SECTOR_SIZE};
use crate::stream_view::{MiniDevice, NormalDevice, SectorDevice, StreamView};

impl CompoundState {
    /// Mini sectors addressable inside the current ministream
    pub(crate) fn mini_sector_count(&self) -> Result<u64> {
        Ok(self
            .directory
            .root()?
            .size
            .div_ceil(MINI_SECTOR_SIZE as u64))
    }

    /// The ministream: a normal chain hanging off the root entry
    pub(crate) fn ministream_view(&mut self) -> Result<StreamView> {
        let (start, size) = {
            let root = self.directory.root()?;
            (root.start_sector, root.size)
        };
        let chain = self.normal_chain(start)?;
        Ok(StreamView::new(chain, size))
    }

    pub(crate) fn minifat_view(&mut self) -> Result<StreamView> {
        let chain = self.normal_chain(self.header.first_mini_fat_sector)?;
        let length = chain.len() as u64 * self.sectors.sector_size() as u64;
        Ok(StreamView::new(chain, length))
    }

    /// Persist a mini chain: first the ministream that holds its data
    /// (root entry start and size included), then the MiniFAT links and
    /// the MiniFAT's own normal chain.
    pub(crate) fn allocate_mini_chain(&mut self, chain: &[u32], ministream: &StreamView) -> Result<()> {
        self.allocate_sector_chain(ministream.chain())?;
        {
            let root = self.directory.root_mut()?;
            root.start_sector = ministream.chain().first().copied().unwrap_or(ENDOFCHAIN);
            root.size = ministream.len();
        }

        let mut minifat = self.minifat_view()?;
        {
            let mut device = NormalDevice::table(&mut self.sectors);
            for link in chain.windows(2) {
                minifat.set_entry(&mut device, link[0], link[1])?;
            }
            if let Some(&last) = chain.last() {
                minifat.set_entry(&mut device, last, ENDOFCHAIN)?;
            }
        }

        self.allocate_sector_chain(minifat.chain())?;
        self.header.first_mini_fat_sector = minifat.chain().first().copied().unwrap_or(ENDOFCHAIN);
        self.header.mini_fat_sectors_count = minifat.chain().len() as u32;

        Ok(())
    }

    /// Free `chain[keep..]` in the MiniFAT, like `free_chain`
    pub(crate) fn free_mini_chain(&mut self, chain: &[u32], keep: usize, zero: bool) -> Result<()> {
        if keep >= chain.len() {
            return Ok(());
        }

        let mut minifat = self.minifat_view()?;
        let mut ministream = if zero {
            Some(self.ministream_view()?)
        } else {
            None
        };

        for &id in &chain[keep..] {
            if let Some(ministream) = ministream.as_mut() {
                MiniDevice::new(&mut self.sectors, ministream).reuse_sector(id)?;
            }
            let mut device = NormalDevice::table(&mut self.sectors);
            minifat.set_entry(&mut device, id, FREESECT)?;
        }
        if keep > 0 {
            let mut device = NormalDevice::table(&mut self.sectors);
            minifat.set_entry(&mut device, chain[keep - 1], ENDOFCHAIN)?;
        }

        Ok(())
    }
}
