//! Save / reload round trips through files and in-memory streams

use compound_rs::{
    list_entries, Clsid, CompoundError, CompoundFile, CompoundFileBuilder, Configuration, Item,
    StorageType, UpdateMode, Version,
};
use std::io::Cursor;
use tempfile::TempDir;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn reload(cf: &CompoundFile) -> CompoundFile {
    let mut image = Cursor::new(Vec::new());
    cf.save(&mut image).unwrap();
    CompoundFile::from_stream(
        Cursor::new(image.into_inner()),
        UpdateMode::ReadOnly,
        Configuration::default(),
    )
    .unwrap()
}

#[test]
fn test_nested_hierarchy_round_trip() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    root.add_stream("Small").unwrap().set_data(&pattern(10, 1)).unwrap();
    root.add_stream("Large").unwrap().set_data(&pattern(70_000, 2)).unwrap();

    let storage = root.add_storage("Folder").unwrap();
    storage.set_clsid(Clsid([5u8; 16])).unwrap();
    storage.set_state_bits(0x42).unwrap();
    storage.add_stream("Inside").unwrap().set_data(&pattern(4096, 3)).unwrap();
    storage.add_storage("Empty").unwrap();

    let loaded = reload(&cf);
    let root = loaded.root_storage();
    assert_eq!(root.child_count().unwrap(), 3);
    assert_eq!(root.get_stream("Small").unwrap().get_data().unwrap(), pattern(10, 1));
    assert_eq!(root.get_stream("Large").unwrap().get_data().unwrap(), pattern(70_000, 2));

    let folder = root.get_storage("Folder").unwrap();
    assert_eq!(folder.clsid().unwrap(), Clsid([5u8; 16]));
    assert_eq!(folder.state_bits().unwrap(), 0x42);
    assert_eq!(folder.get_stream("Inside").unwrap().get_data().unwrap(), pattern(4096, 3));
    assert_eq!(folder.get_storage("Empty").unwrap().child_count().unwrap(), 0);
}

#[test]
fn test_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("doc.cfb");

    let cf = CompoundFile::new();
    cf.root_storage().add_stream("Contents").unwrap().set_data(b"Hello, World!").unwrap();
    cf.save_as(&path).unwrap();

    let loaded = CompoundFile::open(&path).unwrap();
    let data = loaded.root_storage().get_stream("Contents").unwrap().get_data().unwrap();
    assert_eq!(data, b"Hello, World!");
}

#[test]
fn test_v4_round_trip() {
    let cf = CompoundFileBuilder::new().version(Version::V4).create();
    let root = cf.root_storage();
    root.add_stream("Mini").unwrap().set_data(&pattern(100, 4)).unwrap();
    root.add_stream("Normal").unwrap().set_data(&pattern(100_000, 5)).unwrap();

    let loaded = reload(&cf);
    assert_eq!(loaded.version().unwrap(), Version::V4);
    let root = loaded.root_storage();
    assert_eq!(root.get_stream("Mini").unwrap().get_data().unwrap(), pattern(100, 4));
    assert_eq!(root.get_stream("Normal").unwrap().get_data().unwrap(), pattern(100_000, 5));
}

#[test]
fn test_children_sorted_by_length_then_case() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    for name in ["AA", "b", "A", "ccc"] {
        root.add_stream(name).unwrap();
    }

    let loaded = reload(&cf);
    let names: Vec<String> = loaded
        .root_storage()
        .children()
        .unwrap()
        .iter()
        .map(|item| item.name().unwrap())
        .collect();
    assert_eq!(names, vec!["A", "b", "AA", "ccc"]);
}

#[test]
fn test_lookup_is_case_insensitive() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    root.add_stream("Stream").unwrap().set_data(b"x").unwrap();

    assert!(root.try_get_stream("STREAM").unwrap().is_some());
    assert!(matches!(
        root.add_stream("stream"),
        Err(CompoundError::DuplicatedItem(_))
    ));
}

#[test]
fn test_duplicate_add_keeps_child_count() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    root.add_stream("X").unwrap();
    root.add_stream("Y").unwrap();
    let before = root.child_count().unwrap();

    assert!(matches!(root.add_stream("X"), Err(CompoundError::DuplicatedItem(_))));
    assert!(matches!(root.add_storage("X"), Err(CompoundError::DuplicatedItem(_))));
    assert_eq!(root.child_count().unwrap(), before);

    let loaded = reload(&cf);
    assert_eq!(loaded.root_storage().child_count().unwrap(), before);
}

#[test]
fn test_invalid_names_rejected() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();

    let too_long = "x".repeat(32);
    for name in ["a/b", "a\\b", "a:b", "a!b", "", too_long.as_str()] {
        assert!(
            matches!(root.add_stream(name), Err(CompoundError::InvalidName(_))),
            "name {:?} accepted",
            name
        );
    }
    root.add_stream(&"x".repeat(31)).unwrap();
}

#[test]
fn test_get_stream_of_storage_is_not_found() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    root.add_storage("Folder").unwrap();

    assert!(matches!(root.get_stream("Folder"), Err(CompoundError::ItemNotFound(_))));
    assert!(root.try_get_stream("Folder").unwrap().is_none());
    assert!(root.try_get_storage("Folder").unwrap().is_some());
    assert!(matches!(root.get_storage("Nope"), Err(CompoundError::ItemNotFound(_))));
}

#[test]
fn test_visit_entries_recursive() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    root.add_stream("S1").unwrap();
    let folder = root.add_storage("F").unwrap();
    folder.add_stream("S2").unwrap();
    folder.add_storage("G").unwrap().add_stream("S3").unwrap();

    let mut flat = Vec::new();
    root.visit_entries(|item| flat.push(item.name().unwrap()), false).unwrap();
    assert_eq!(flat, vec!["F", "S1"]);

    let mut all = Vec::new();
    root.visit_entries(|item| all.push(item.name().unwrap()), true).unwrap();
    assert_eq!(all, vec!["F", "G", "S3", "S2", "S1"]);
}

#[test]
fn test_stream_read_write_api() {
    let cf = CompoundFile::new();
    let stream = cf.root_storage().add_stream("Data").unwrap();

    stream.write(b"world", 6).unwrap();
    stream.write(b"hello ", 0).unwrap();
    stream.append(b"!").unwrap();
    assert_eq!(stream.get_data().unwrap(), b"hello world!");
    assert_eq!(stream.size().unwrap(), 12);

    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf, 6, 5).unwrap(), 5);
    assert_eq!(&buf[..5], b"world");
    assert!(matches!(
        stream.read(&mut buf, 0, 9),
        Err(CompoundError::InvalidArgument(_))
    ));

    stream.resize(5).unwrap();
    assert_eq!(stream.get_data().unwrap(), b"hello");

    let mut source = Cursor::new(pattern(5000, 9));
    stream.copy_from(&mut source).unwrap();
    let mut sink = Vec::new();
    assert_eq!(stream.copy_to(&mut sink).unwrap(), 5000);
    assert_eq!(sink, pattern(5000, 9));
}

#[test]
fn test_entry_info_and_listing() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    let folder = root.add_storage("Folder").unwrap();
    folder.add_stream("Data").unwrap().set_data(&[0u8; 300]).unwrap();

    let info = folder.info().unwrap();
    assert_eq!(info.storage_type, StorageType::Storage);
    assert!(info.created.is_some());

    let loaded = reload(&cf);
    let entries = list_entries(&loaded).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].path, "Folder/Data");
    assert_eq!(entries[1].size, 300);

    let found = loaded.all_named_entries("Data").unwrap();
    assert!(matches!(found.as_slice(), [Item::Stream(_)]));
}
