//! Sector types and chain sentinels

/// Free sector marker (also NOSTREAM for directory links)
pub const FREESECT: u32 = 0xFFFF_FFFF;

/// Chain terminator
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;

/// FAT entry of a sector holding FAT data
pub const FATSECT: u32 = 0xFFFF_FFFD;

/// FAT entry of a sector holding DIFAT data
pub const DIFSECT: u32 = 0xFFFF_FFFC;

/// Empty directory link
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Largest id usable as a real sector
pub const MAXREGSECT: u32 = 0xFFFF_FFFA;

pub const MINI_SECTOR_SIZE: usize = 64;

/// File offset covered by the v4 range lock sector
pub const RANGE_LOCK_OFFSET: u64 = 0x7FFF_FF00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectorType {
    Normal,
    Mini,
    Fat,
    Difat,
    Directory,
    RangeLock,
}

impl SectorType {
    /// Bytes a freshly created sector of this type is filled with.
    /// Allocation tables start out as all FREESECT.
    pub fn fill_byte(self) -> u8 {
        match self {
            SectorType::Fat | SectorType::Difat => 0xFF,
            _ => 0x00,
        }
    }
}

/// One fixed-size block of the file body
#[derive(Debug, Clone)]
pub struct Sector {
    pub id: u32,
    pub sector_type: SectorType,
    pub dirty: bool,
    pub data: Vec<u8>,
}

impl Sector {
    /// A fresh, dirty sector filled according to its type
    pub fn new(id: u32, size: usize, sector_type: SectorType) -> Self {
        Sector {
            id,
            sector_type,
            dirty: true,
            data: vec![sector_type.fill_byte(); size],
        }
    }

    /// A clean sector materialized from the backing medium
    pub fn loaded(id: u32, sector_type: SectorType, data: Vec<u8>) -> Self {
        Sector {
            id,
            sector_type,
            dirty: false,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn zero(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }

    pub fn read_u32(&self, index: usize) -> u32 {
        let offset = index * 4;
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    pub fn write_u32(&mut self, index: usize, value: u32) {
        let offset = index * 4;
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.dirty = true;
    }
}

/// Sector id whose file range contains `RANGE_LOCK_OFFSET`
pub fn range_lock_sector_id(sector_size: usize) -> u32 {
    (RANGE_LOCK_OFFSET / sector_size as u64 - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat_sector_starts_free() {
        let sector = Sector::new(0, 512, SectorType::Fat);
        assert!(sector.dirty);
        assert_eq!(sector.read_u32(0), FREESECT);
        assert_eq!(sector.read_u32(127), FREESECT);
    }

    #[test]
    fn test_normal_sector_starts_zeroed() {
        let sector = Sector::new(3, 4096, SectorType::Normal);
        assert_eq!(sector.size(), 4096);
        assert!(sector.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_u32_access() {
        let mut sector = Sector::loaded(1, SectorType::Fat, vec![0; 512]);
        assert!(!sector.dirty);
        sector.write_u32(5, ENDOFCHAIN);
        assert!(sector.dirty);
        assert_eq!(sector.read_u32(5), ENDOFCHAIN);
        assert_eq!(&sector.data[20..24], &[0xFE, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_range_lock_id() {
        // (id + 1) * 4096 is the first byte of the sector
        let id = range_lock_sector_id(4096) as u64;
        assert!((id + 1) * 4096 <= RANGE_LOCK_OFFSET);
        assert!((id + 2) * 4096 > RANGE_LOCK_OFFSET);
    }
}
