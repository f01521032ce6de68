//! Directory entry records (128 bytes each)

use crate::config::Version;
use crate::error::{CompoundError, Result};
use crate::sector::{ENDOFCHAIN, NOSTREAM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DIRECTORY_ENTRY_SIZE: usize = 128;

/// Name slot capacity in UTF-16 units, terminator included
const NAME_SLOT_UNITS: usize = 32;

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    Invalid = 0,
    Storage = 1,
    Stream = 2,
    LockBytes = 3,
    Property = 4,
    Root = 5,
}

impl StorageType {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => StorageType::Storage,
            2 => StorageType::Stream,
            3 => StorageType::LockBytes,
            4 => StorageType::Property,
            5 => StorageType::Root,
            _ => StorageType::Invalid,
        }
    }

    /// Storages and the root own a child tree
    pub fn is_container(self) -> bool {
        matches!(self, StorageType::Storage | StorageType::Root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red = 0,
    Black = 1,
}

/// Class id attached to storages (16 raw bytes, GUID layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Clsid(pub [u8; 16]);

impl Clsid {
    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Display for Clsid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

/// Current wall-clock time as a FILETIME
pub fn filetime_now() -> u64 {
    let now = Utc::now();
    let ticks = now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100);
    (ticks + FILETIME_UNIX_EPOCH).max(0) as u64
}

/// FILETIME to UTC, `None` for zero (unset) or out of range
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()? - FILETIME_UNIX_EPOCH;
    DateTime::from_timestamp(
        ticks.div_euclid(10_000_000),
        (ticks.rem_euclid(10_000_000) * 100) as u32,
    )
}

/// Compare entry names the way the directory tree orders them: shorter
/// names first, then unit by unit ignoring case.
pub fn compare_names(a: &[u16], b: &[u16]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| upper_unit(x).cmp(&upper_unit(y)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}

fn upper_unit(unit: u16) -> u32 {
    match char::from_u32(u32::from(unit)) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) => u as u32,
                _ => u32::from(unit),
            }
        }
        // Lone surrogate
        None => u32::from(unit),
    }
}

/// One directory record. Doubles as a node of its parent storage's
/// red-black tree through `left`, `right`, `color` and `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub sid: u32,
    pub name: Vec<u16>,
    pub storage_type: StorageType,
    pub color: Color,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub clsid: Clsid,
    pub state_bits: u32,
    pub creation_time: u64,
    pub modified_time: u64,
    pub start_sector: u32,
    pub size: u64,

    /// Tree parent, kept in memory only
    pub parent: Option<u32>,

    /// Bumped whenever the slot is freed or reused; handles compare it to
    /// spot a SID that now names another entry. Kept in memory only.
    pub generation: u32,
}

impl DirectoryEntry {
    pub fn new(sid: u32, name: Vec<u16>, storage_type: StorageType) -> Self {
        let (start_sector, creation_time) = match storage_type {
            StorageType::Storage => (0, filetime_now()),
            StorageType::Stream | StorageType::Root => (ENDOFCHAIN, 0),
            _ => (0, 0),
        };

        DirectoryEntry {
            sid,
            name,
            storage_type,
            color: Color::Black,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: Clsid::default(),
            state_bits: 0,
            creation_time,
            modified_time: 0,
            start_sector,
            size: 0,
            parent: None,
            generation: 0,
        }
    }

    /// Unused slot
    pub fn invalid(sid: u32) -> Self {
        Self::new(sid, Vec::new(), StorageType::Invalid)
    }

    pub fn root() -> Self {
        Self::new(0, "Root Entry".encode_utf16().collect(), StorageType::Root)
    }

    pub fn name_string(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }

    pub fn is_invalid(&self) -> bool {
        self.storage_type == StorageType::Invalid
    }

    pub fn compare(&self, other: &DirectoryEntry) -> Ordering {
        compare_names(&self.name, &other.name)
    }

    pub fn to_bytes(&self, version: Version) -> [u8; DIRECTORY_ENTRY_SIZE] {
        let mut bytes = [0u8; DIRECTORY_ENTRY_SIZE];

        let units = self.name.len().min(NAME_SLOT_UNITS - 1);
        for (i, unit) in self.name[..units].iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let name_length: u16 = if units == 0 { 0 } else { ((units + 1) * 2) as u16 };
        bytes[64..66].copy_from_slice(&name_length.to_le_bytes());

        bytes[66] = self.storage_type as u8;
        bytes[67] = self.color as u8;
        bytes[68..72].copy_from_slice(&self.left.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.right.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.child.to_le_bytes());
        bytes[80..96].copy_from_slice(&self.clsid.0);
        bytes[96..100].copy_from_slice(&self.state_bits.to_le_bytes());
        bytes[100..108].copy_from_slice(&self.creation_time.to_le_bytes());
        bytes[108..116].copy_from_slice(&self.modified_time.to_le_bytes());
        bytes[116..120].copy_from_slice(&self.start_sector.to_le_bytes());

        match version {
            Version::V3 => bytes[120..124].copy_from_slice(&(self.size as u32).to_le_bytes()),
            Version::V4 => bytes[120..128].copy_from_slice(&self.size.to_le_bytes()),
        }

        bytes
    }

    pub fn from_bytes(sid: u32, bytes: &[u8], version: Version) -> Result<Self> {
        if bytes.len() < DIRECTORY_ENTRY_SIZE {
            return Err(CompoundError::Corrupted(format!(
                "directory entry {} truncated ({} bytes)",
                sid,
                bytes.len()
            )));
        }

        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let u64_at = |offset: usize| u64::from(u32_at(offset)) | (u64::from(u32_at(offset + 4)) << 32);

        let name_length = u16::from_le_bytes([bytes[64], bytes[65]]) as usize;
        let units = (name_length / 2).saturating_sub(1).min(NAME_SLOT_UNITS - 1);
        let name: Vec<u16> = (0..units)
            .map(|i| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]))
            .take_while(|&unit| unit != 0)
            .collect();

        let storage_type = StorageType::from_byte(bytes[66]);
        let color = if bytes[67] == 0 { Color::Red } else { Color::Black };

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&bytes[80..96]);

        // v3 only defines the low 32 bits; some writers leave garbage above
        let size = match version {
            Version::V3 => u64::from(u32_at(120)),
            Version::V4 => u64_at(120),
        };

        let mut entry = DirectoryEntry {
            sid,
            name,
            storage_type,
            color,
            left: u32_at(68),
            right: u32_at(72),
            child: u32_at(76),
            clsid: Clsid(clsid),
            state_bits: u32_at(96),
            creation_time: u64_at(100),
            modified_time: u64_at(108),
            start_sector: u32_at(116),
            size,
            parent: None,
            generation: 0,
        };

        if entry.is_invalid() {
            entry.left = NOSTREAM;
            entry.right = NOSTREAM;
            entry.child = NOSTREAM;
        }

        Ok(entry)
    }
}

/// Public metadata snapshot of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub sid: u32,
    pub name: String,
    pub storage_type: StorageType,
    pub size: u64,
    pub clsid: Clsid,
    pub state_bits: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl From<&DirectoryEntry> for EntryInfo {
    fn from(entry: &DirectoryEntry) -> Self {
        EntryInfo {
            sid: entry.sid,
            name: entry.name_string(),
            storage_type: entry.storage_type,
            size: entry.size,
            clsid: entry.clsid,
            state_bits: entry.state_bits,
            created: filetime_to_datetime(entry.creation_time),
            modified: filetime_to_datetime(entry.modified_time),
        }
    }
}
