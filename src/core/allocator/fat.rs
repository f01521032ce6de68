//! FAT and DIFAT allocation

use super::ChainKind;
use crate::compound_file::CompoundState;
use crate::error::Result;
use crate::header::HEADER_DIFAT_ENTRIES;
use crate::sector::{SectorType, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT};
use crate::stream_view::{NormalDevice, StreamView};
use std::collections::VecDeque;
use tracing::debug;

impl CompoundState {
    /// Persist a normal chain: link it through the FAT, then make sure the
    /// FAT and DIFAT cover every sector in the arena.
    pub(crate) fn allocate_sector_chain(&mut self, chain: &[u32]) -> Result<()> {
        let fat = self.allocate_fat_chain(chain)?;
        self.allocate_difat_chain(fat)
    }

    /// Write the next-pointers of `chain` (ENDOFCHAIN at the tail). The
    /// returned FAT view includes any FAT sectors added on the way; they
    /// are not reachable from the header until `allocate_difat_chain`.
    pub(crate) fn allocate_fat_chain(&mut self, chain: &[u32]) -> Result<StreamView> {
        let mut fat = self.fat_view()?;
        let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);

        for link in chain.windows(2) {
            fat.set_entry(&mut device, link[0], link[1])?;
        }
        if let Some(&last) = chain.last() {
            fat.set_entry(&mut device, last, ENDOFCHAIN)?;
        }

        Ok(fat)
    }

    /// Grow FAT and DIFAT until every sector has a FAT entry, then record
    /// the FAT sector list in the header and DIFAT sectors.
    ///
    /// Adding a FAT sector can require a DIFAT sector, which needs a FAT
    /// entry of its own, so this loops until nothing changes.
    pub(crate) fn allocate_difat_chain(&mut self, mut fat: StreamView) -> Result<()> {
        let entries_per_sector = self.sectors.sector_size() / 4;
        let ids_per_difat = entries_per_sector - 1;
        let mut difat = self.difat_chain()?;

        loop {
            let fat_sectors = fat.chain().len();
            let needed_difat = fat_sectors
                .saturating_sub(HEADER_DIFAT_ENTRIES)
                .div_ceil(ids_per_difat);
            while difat.len() < needed_difat {
                difat.push(self.sectors.add(SectorType::Difat));
            }

            let total = self.sectors.len();
            if fat_sectors * entries_per_sector >= total {
                break;
            }

            let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);
            fat.set_len(&mut device, total as u64 * 4)?;
        }

        let fat_ids = fat.chain().to_vec();

        for (index, slot) in self.header.difat.iter_mut().enumerate() {
            *slot = fat_ids.get(index).copied().unwrap_or(FREESECT);
        }

        for (k, &difat_id) in difat.iter().enumerate() {
            let sector = self.sectors.get(difat_id)?;
            for slot in 0..ids_per_difat {
                let index = HEADER_DIFAT_ENTRIES + k * ids_per_difat + slot;
                sector.write_u32(slot, fat_ids.get(index).copied().unwrap_or(FREESECT));
            }
            sector.write_u32(ids_per_difat, difat.get(k + 1).copied().unwrap_or(ENDOFCHAIN));
            sector.sector_type = SectorType::Difat;
        }

        let range_lock = self.sectors.take_pending_range_lock();
        let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);
        for &id in &fat_ids {
            fat.set_entry(&mut device, id, FATSECT)?;
        }
        for &id in &difat {
            fat.set_entry(&mut device, id, DIFSECT)?;
        }
        if let Some(id) = range_lock {
            fat.set_entry(&mut device, id, ENDOFCHAIN)?;
        }

        if self.header.fat_sectors_count as usize != fat_ids.len()
            || self.header.difat_sectors_count as usize != difat.len()
        {
            debug!(
                "FAT grew to {} sectors, DIFAT to {} sectors",
                fat_ids.len(),
                difat.len()
            );
        }

        self.header.fat_sectors_count = fat_ids.len() as u32;
        self.header.difat_sectors_count = difat.len() as u32;
        self.header.first_difat_sector = difat.first().copied().unwrap_or(ENDOFCHAIN);

        Ok(())
    }

    /// Free `chain[keep..]`. With `keep > 0` the kept prefix gets a new
    /// ENDOFCHAIN; with `zero` the freed payloads are wiped.
    pub(crate) fn free_chain(&mut self, chain: &[u32], keep: usize, zero: bool) -> Result<()> {
        if keep >= chain.len() {
            return Ok(());
        }

        let mut fat = self.fat_view()?;
        let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);

        for &id in &chain[keep..] {
            if zero {
                device.sectors().get(id)?.zero();
            }
            fat.set_entry(&mut device, id, FREESECT)?;
        }
        if keep > 0 {
            fat.set_entry(&mut device, chain[keep - 1], ENDOFCHAIN)?;
        }

        debug!("Freed {} sectors, kept {}", chain.len() - keep, keep);
        Ok(())
    }

    /// Sector ids marked FREESECT in the FAT (or MiniFAT for `Mini`), in
    /// ascending order
    pub(crate) fn find_free_sectors(&mut self, kind: ChainKind) -> Result<VecDeque<u32>> {
        let (mut table, limit) = match kind {
            ChainKind::Mini => (self.minifat_view()?, self.mini_sector_count()?),
            _ => (self.fat_view()?, self.sectors.len() as u64),
        };

        let entries = (table.len() / 4).min(limit);
        let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);
        let mut free = VecDeque::new();

        table.seek(0);
        for index in 0..entries {
            if table.read_u32(&mut device)? == FREESECT {
                free.push_back(index as u32);
            }
        }

        Ok(free)
    }
}
