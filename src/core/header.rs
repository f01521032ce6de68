use crate::config::Version;
use crate::error::{CompoundError, Result};
use crate::sector::{ENDOFCHAIN, FREESECT};

pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const MINOR_VERSION: u16 = 0x003E;
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;
pub const MINI_SECTOR_SHIFT: u16 = 6;
pub const DEFAULT_MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of FAT sector ids stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Size of the fixed header fields (the rest of a v4 first sector is padding)
pub const HEADER_SIZE: usize = 512;

/// Compound file header (first sector of the file)
///
/// Holds the geometry of the file and the entry points of every
/// allocation structure: the FAT (through the inline DIFAT array and the
/// DIFAT chain), the MiniFAT and the directory chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Magic number: D0 CF 11 E0 A1 B1 1A E1
    pub signature: [u8; 8],

    /// Header CLSID, reserved and normally zero
    pub clsid: [u8; 16],

    pub minor_version: u16,

    /// 3 (512-byte sectors) or 4 (4096-byte sectors)
    pub major_version: u16,

    pub byte_order: u16,

    /// Sector size as a power of two (9 or 12)
    pub sector_shift: u16,

    /// Mini-sector size as a power of two (always 6)
    pub mini_sector_shift: u16,

    /// Directory sector count, always zero for version 3
    pub directory_sectors_count: u32,

    pub fat_sectors_count: u32,

    pub first_directory_sector: u32,

    pub transaction_signature: u32,

    /// Streams smaller than this live in the mini-stream
    pub mini_stream_cutoff: u32,

    pub first_mini_fat_sector: u32,

    pub mini_fat_sectors_count: u32,

    pub first_difat_sector: u32,

    pub difat_sectors_count: u32,

    /// Inline DIFAT: ids of the first 109 FAT sectors
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Create a header for an empty file of the given version
    pub fn new(version: Version) -> Self {
        Header {
            signature: SIGNATURE,
            clsid: [0; 16],
            minor_version: MINOR_VERSION,
            major_version: version as u16,
            byte_order: BYTE_ORDER_MARK,
            sector_shift: version.sector_shift(),
            mini_sector_shift: MINI_SECTOR_SHIFT,
            directory_sectors_count: 0,
            fat_sectors_count: 0,
            first_directory_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: DEFAULT_MINI_STREAM_CUTOFF,
            first_mini_fat_sector: ENDOFCHAIN,
            mini_fat_sectors_count: 0,
            first_difat_sector: ENDOFCHAIN,
            difat_sectors_count: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    /// Validate signature, version and geometry
    pub fn validate(&self) -> Result<()> {
        if self.signature != SIGNATURE {
            return Err(CompoundError::InvalidSignature);
        }

        let version = Version::from_major(self.major_version)
            .ok_or(CompoundError::UnsupportedVersion {
                major: self.major_version,
            })?;

        if self.byte_order != BYTE_ORDER_MARK {
            return Err(CompoundError::InvalidHeader(format!(
                "byte order mark {:#06x} (expected {:#06x})",
                self.byte_order, BYTE_ORDER_MARK
            )));
        }

        if self.sector_shift != version.sector_shift() {
            return Err(CompoundError::InvalidHeader(format!(
                "sector shift {} does not match version {}",
                self.sector_shift, self.major_version
            )));
        }

        if self.mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(CompoundError::InvalidHeader(format!(
                "mini sector shift {} (expected {})",
                self.mini_sector_shift, MINI_SECTOR_SHIFT
            )));
        }

        Ok(())
    }

    /// The format version. Only meaningful on a validated header.
    pub fn version(&self) -> Version {
        Version::from_major(self.major_version).unwrap_or(Version::V3)
    }

    pub fn sector_size(&self) -> usize {
        1usize << self.sector_shift
    }

    /// Serialize to a full first sector (512 bytes for v3, 4096 for v4)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.sector_size());

        bytes.extend_from_slice(&self.signature);
        bytes.extend_from_slice(&self.clsid);
        bytes.extend_from_slice(&self.minor_version.to_le_bytes());
        bytes.extend_from_slice(&self.major_version.to_le_bytes());
        bytes.extend_from_slice(&self.byte_order.to_le_bytes());
        bytes.extend_from_slice(&self.sector_shift.to_le_bytes());
        bytes.extend_from_slice(&self.mini_sector_shift.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        bytes.extend_from_slice(&self.directory_sectors_count.to_le_bytes());
        bytes.extend_from_slice(&self.fat_sectors_count.to_le_bytes());
        bytes.extend_from_slice(&self.first_directory_sector.to_le_bytes());
        bytes.extend_from_slice(&self.transaction_signature.to_le_bytes());
        bytes.extend_from_slice(&self.mini_stream_cutoff.to_le_bytes());
        bytes.extend_from_slice(&self.first_mini_fat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.mini_fat_sectors_count.to_le_bytes());
        bytes.extend_from_slice(&self.first_difat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.difat_sectors_count.to_le_bytes());
        for id in &self.difat {
            bytes.extend_from_slice(&id.to_le_bytes());
        }

        // v4 pads the header out to a whole 4096-byte sector
        bytes.resize(self.sector_size().max(HEADER_SIZE), 0);

        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CompoundError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut header = Header::new(Version::V3);

        header.signature.copy_from_slice(&bytes[0..8]);
        if header.signature != SIGNATURE {
            return Err(CompoundError::InvalidSignature);
        }

        header.clsid.copy_from_slice(&bytes[8..24]);
        header.minor_version = u16_at(bytes, 24);
        header.major_version = u16_at(bytes, 26);
        header.byte_order = u16_at(bytes, 28);
        header.sector_shift = u16_at(bytes, 30);
        header.mini_sector_shift = u16_at(bytes, 32);
        header.directory_sectors_count = u32_at(bytes, 40);
        header.fat_sectors_count = u32_at(bytes, 44);
        header.first_directory_sector = u32_at(bytes, 48);
        header.transaction_signature = u32_at(bytes, 52);
        header.mini_stream_cutoff = u32_at(bytes, 56);
        header.first_mini_fat_sector = u32_at(bytes, 60);
        header.mini_fat_sectors_count = u32_at(bytes, 64);
        header.first_difat_sector = u32_at(bytes, 68);
        header.difat_sectors_count = u32_at(bytes, 72);

        for (i, slot) in header.difat.iter_mut().enumerate() {
            *slot = u32_at(bytes, 76 + i * 4);
        }

        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(Version::V3)
    }
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
