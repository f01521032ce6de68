//! Corruption detection on hand-built files
//!
//! Every image here is a version 3 file laid out as:
//! sector 0 = FAT, sectors 1..=3 = stream data, sector 4 = directory.

use compound_rs::core::directory::{DirectoryEntry, StorageType};
use compound_rs::core::header::Header;
use compound_rs::core::sector::{ENDOFCHAIN, FATSECT, FREESECT};
use compound_rs::{CompoundError, CompoundFile, Configuration, UpdateMode, Version};
use std::io::Cursor;

const SECTOR: usize = 512;

fn units(name: &str) -> Vec<u16> {
    name.encode_utf16().collect()
}

/// Root with a single 5000-byte stream "Cyc" starting at sector 1
fn directory() -> Vec<DirectoryEntry> {
    let mut root = DirectoryEntry::root();
    root.child = 1;

    let mut stream = DirectoryEntry::new(1, units("Cyc"), StorageType::Stream);
    stream.start_sector = 1;
    stream.size = 5000;

    vec![root, stream]
}

fn build_image(header: Header, fat: &[u32], entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut bytes = header.to_bytes();

    let mut fat_sector = vec![0xFFu8; SECTOR];
    for (i, value) in fat.iter().enumerate() {
        fat_sector[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    bytes.extend_from_slice(&fat_sector);

    for _ in 1..=3 {
        bytes.extend(std::iter::repeat(0x11u8).take(SECTOR));
    }

    let mut dir_sector = Vec::with_capacity(SECTOR);
    for sid in 0..4u32 {
        let entry = entries
            .get(sid as usize)
            .cloned()
            .unwrap_or_else(|| DirectoryEntry::invalid(sid));
        dir_sector.extend_from_slice(&entry.to_bytes(Version::V3));
    }
    bytes.extend_from_slice(&dir_sector);

    bytes
}

fn header() -> Header {
    let mut header = Header::new(Version::V3);
    header.fat_sectors_count = 1;
    header.difat[0] = 0;
    header.first_directory_sector = 4;
    header
}

/// Sector 3 points back to sector 1
fn cyclic_fat() -> Vec<u32> {
    vec![FATSECT, 2, 3, 1, ENDOFCHAIN]
}

fn open(bytes: Vec<u8>, lenient: bool) -> compound_rs::Result<CompoundFile> {
    let config = Configuration::default().with_no_validation_exception(lenient);
    CompoundFile::from_stream(Cursor::new(bytes), UpdateMode::ReadOnly, config)
}

#[test]
fn test_fat_cycle_is_corruption() {
    let cf = open(build_image(header(), &cyclic_fat(), &directory()), false).unwrap();
    let stream = cf.root_storage().get_stream("Cyc").unwrap();

    let err = stream.get_data().unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {}", err);
}

#[test]
fn test_fat_cycle_lenient_reads_what_it_can() {
    let cf = open(build_image(header(), &cyclic_fat(), &directory()), true).unwrap();
    let data = cf.root_storage().get_stream("Cyc").unwrap().get_data().unwrap();

    // Chain 1 -> 2 -> 3 is cut at the cycle
    assert_eq!(data.len(), 3 * SECTOR);
    assert!(data.iter().all(|&b| b == 0x11));
}

#[test]
fn test_out_of_range_next_sector() {
    let fat = vec![FATSECT, 99, 3, ENDOFCHAIN, ENDOFCHAIN];
    let cf = open(build_image(header(), &fat, &directory()), false).unwrap();

    let err = cf.root_storage().get_stream("Cyc").unwrap().get_data().unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_directory_chain_cycle_fails_load() {
    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, 4];
    let err = open(build_image(header(), &fat, &directory()), false).unwrap_err();
    assert!(err.is_corruption());

    // Lenient load stops at the repeated sector and carries on
    let cf = open(build_image(header(), &fat, &directory()), true).unwrap();
    assert_eq!(cf.root_storage().child_count().unwrap(), 1);
}

#[test]
fn test_sibling_cycle_fails_load() {
    let mut entries = directory();
    entries[1].left = 1;

    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, ENDOFCHAIN];
    let err = open(build_image(header(), &fat, &entries), false).unwrap_err();
    assert!(matches!(err, CompoundError::Corrupted(_)));

    let cf = open(build_image(header(), &fat, &entries), true).unwrap();
    assert_eq!(cf.root_storage().child_count().unwrap(), 1);
}

#[test]
fn test_child_out_of_range_fails_load() {
    let mut entries = directory();
    entries[0].child = 40;

    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, ENDOFCHAIN];
    let err = open(build_image(header(), &fat, &entries), false).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_fat_count_mismatch() {
    let mut header = header();
    header.fat_sectors_count = 2;

    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, ENDOFCHAIN];
    let err = open(build_image(header, &fat, &directory()), false).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_empty_directory_chain() {
    let mut header = header();
    header.first_directory_sector = ENDOFCHAIN;

    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, FREESECT];
    let err = open(build_image(header, &fat, &directory()), true).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_bad_signature() {
    let mut bytes = build_image(header(), &cyclic_fat(), &directory());
    bytes[0] = 0x00;

    let err = open(bytes, true).unwrap_err();
    assert!(matches!(err, CompoundError::InvalidSignature));
    assert!(err.is_format_error());
}

#[test]
fn test_unsupported_version() {
    let mut header = header();
    header.major_version = 5;

    let err = open(build_image(header, &cyclic_fat(), &directory()), true).unwrap_err();
    assert!(matches!(err, CompoundError::UnsupportedVersion { major: 5 }));
}

#[test]
fn test_truncated_header() {
    let err = open(vec![0xD0, 0xCF, 0x11], true).unwrap_err();
    assert!(matches!(err, CompoundError::Io(_)));
}

#[test]
fn test_huge_declared_table_counts() {
    let mut header = header();
    header.fat_sectors_count = 0xFFFF_FFF0;
    header.difat_sectors_count = 0xFFFF_FFF0;

    let fat = vec![FATSECT, 2, 3, ENDOFCHAIN, ENDOFCHAIN];
    let err = open(build_image(header.clone(), &fat, &directory()), false).unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {}", err);

    // Lenient load keeps the one FAT sector the header array lists
    let cf = open(build_image(header, &fat, &directory()), true).unwrap();
    let data = cf.root_storage().get_stream("Cyc").unwrap().get_data().unwrap();
    assert_eq!(data.len(), 3 * SECTOR);
}

#[test]
fn test_free_marker_inside_chain() {
    let fat = vec![FATSECT, 2, FREESECT, ENDOFCHAIN, ENDOFCHAIN];
    let cf = open(build_image(header(), &fat, &directory()), false).unwrap();

    let err = cf.root_storage().get_stream("Cyc").unwrap().get_data().unwrap_err();
    assert!(err.to_string().contains("marker 0xFFFFFFFF"), "unexpected error: {}", err);

    let cf = open(build_image(header(), &fat, &directory()), true).unwrap();
    let data = cf.root_storage().get_stream("Cyc").unwrap().get_data().unwrap();
    assert_eq!(data.len(), 2 * SECTOR);
}
