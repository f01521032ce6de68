//! Walking sector chains
//!
//! Every next-pointer comes from untrusted disk data, so each walk checks
//! ids against the arena size and keeps a visited set.

use super::{corruption, ChainKind};
use crate::compound_file::CompoundState;
use crate::error::Result;
use crate::header::HEADER_DIFAT_ENTRIES;
use crate::sector::{SectorType, ENDOFCHAIN, FREESECT, MAXREGSECT};
use crate::stream_view::{NormalDevice, StreamView};
use ahash::AHashSet;
use tracing::warn;

impl CompoundState {
    /// Resolve the chain of `kind` starting at `start`. DIFAT and FAT
    /// chains start from the header and ignore `start`.
    pub(crate) fn sector_chain(&mut self, start: u32, kind: ChainKind) -> Result<Vec<u32>> {
        match kind {
            ChainKind::Difat => self.difat_chain(),
            ChainKind::Fat => self.fat_chain(),
            ChainKind::Normal => self.normal_chain(start),
            ChainKind::Mini => self.mini_chain(start),
        }
    }

    pub(crate) fn difat_chain(&mut self) -> Result<Vec<u32>> {
        let lenient = self.config.no_validation_exception;
        let budget = self.header.difat_sectors_count as usize;
        let next_slot = self.sectors.sector_size() / 4 - 1;

        // Header counts are untrusted; the arena bounds any real chain
        let mut chain = Vec::with_capacity(budget.min(self.sectors.len()));
        let mut visited = AHashSet::new();
        let mut next = self.header.first_difat_sector;

        while next != ENDOFCHAIN && next != FREESECT {
            if chain.len() >= budget {
                corruption(
                    lenient,
                    format!("DIFAT chain longer than the {} sectors declared", budget),
                )?;
                break;
            }
            if next as usize >= self.sectors.len() {
                corruption(
                    lenient,
                    format!(
                        "DIFAT sector {} out of range ({} sectors)",
                        next,
                        self.sectors.len()
                    ),
                )?;
                break;
            }
            if !visited.insert(next) {
                corruption(lenient, format!("cycle in DIFAT chain at sector {}", next))?;
                break;
            }

            chain.push(next);
            next = self.sectors.get(next)?.read_u32(next_slot);
        }

        Ok(chain)
    }

    /// Ids of all FAT sectors, in table order
    pub(crate) fn fat_chain(&mut self) -> Result<Vec<u32>> {
        let lenient = self.config.no_validation_exception;
        let declared = self.header.fat_sectors_count as usize;
        let mut chain = Vec::with_capacity(declared.min(self.sectors.len()));

        for &id in self.header.difat.iter() {
            if chain.len() == declared || id == FREESECT || id == ENDOFCHAIN {
                break;
            }
            chain.push(id);
        }

        if chain.len() < declared && chain.len() == HEADER_DIFAT_ENTRIES {
            let ids_per_sector = self.sectors.sector_size() / 4 - 1;
            let difat = self.difat_chain()?;

            'difat: for difat_id in difat {
                for slot in 0..ids_per_sector {
                    if chain.len() == declared {
                        break 'difat;
                    }
                    let id = self.sectors.get(difat_id)?.read_u32(slot);
                    if id == FREESECT || id == ENDOFCHAIN {
                        break 'difat;
                    }
                    chain.push(id);
                }
            }
        }

        if chain.len() != declared {
            corruption(
                lenient,
                format!(
                    "header declares {} FAT sectors, DIFAT lists {}",
                    declared,
                    chain.len()
                ),
            )?;
        }

        let total = self.sectors.len();
        if let Some(&bad) = chain.iter().find(|&&id| id as usize >= total) {
            corruption(
                lenient,
                format!("FAT sector {} out of range ({} sectors)", bad, total),
            )?;
            chain.retain(|&id| (id as usize) < total);
        }

        Ok(chain)
    }

    /// The FAT as one table of 4-byte entries
    pub(crate) fn fat_view(&mut self) -> Result<StreamView> {
        let chain = self.fat_chain()?;
        let length = chain.len() as u64 * self.sectors.sector_size() as u64;
        Ok(StreamView::new(chain, length))
    }

    pub(crate) fn normal_chain(&mut self, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN || start == FREESECT {
            return Ok(chain);
        }

        let lenient = self.config.no_validation_exception;
        let total = self.sectors.len();
        let mut fat = self.fat_view()?;
        let mut device = NormalDevice::new(&mut self.sectors, SectorType::Fat);
        let mut visited = AHashSet::new();
        let mut next = start;

        while next != ENDOFCHAIN {
            if next > MAXREGSECT {
                corruption(
                    lenient,
                    format!("chain starting at {} hits marker {:#010X}", start, next),
                )?;
                break;
            }
            if next as usize >= total {
                corruption(
                    lenient,
                    format!(
                        "sector {} in chain starting at {} out of range ({} sectors)",
                        next, start, total
                    ),
                )?;
                break;
            }
            if !visited.insert(next) {
                corruption(
                    lenient,
                    format!("cycle at sector {} in chain starting at {}", next, start),
                )?;
                break;
            }

            chain.push(next);
            next = match fat.entry(&mut device, next) {
                Ok(id) => id,
                Err(e) if lenient && e.is_corruption() => {
                    warn!("Ignoring corruption: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            };
        }

        Ok(chain)
    }

    pub(crate) fn mini_chain(&mut self, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN || start == FREESECT {
            return Ok(chain);
        }

        let lenient = self.config.no_validation_exception;
        let total = self.mini_sector_count()?;
        let mut minifat = self.minifat_view()?;
        let mut device = NormalDevice::table(&mut self.sectors);
        let mut visited = AHashSet::new();
        let mut next = start;

        while next != ENDOFCHAIN {
            if next > MAXREGSECT {
                corruption(
                    lenient,
                    format!("mini chain starting at {} hits marker {:#010X}", start, next),
                )?;
                break;
            }
            if next as u64 >= total {
                corruption(
                    lenient,
                    format!(
                        "mini sector {} in chain starting at {} out of range ({} mini sectors)",
                        next, start, total
                    ),
                )?;
                break;
            }
            if !visited.insert(next) {
                corruption(
                    lenient,
                    format!("cycle at mini sector {} in chain starting at {}", next, start),
                )?;
                break;
            }

            chain.push(next);
            next = match minifat.entry(&mut device, next) {
                Ok(id) => id,
                Err(e) if lenient && e.is_corruption() => {
                    warn!("Ignoring corruption: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            };
        }

        Ok(chain)
    }
}
