//! Mini / normal storage around the 4096-byte cutoff

use compound_rs::{CompoundFile, Configuration, UpdateMode};
use std::io::Cursor;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
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
fn test_one_below_cutoff_uses_ministream() {
    let cf = CompoundFile::new();
    cf.root_storage().add_stream("S").unwrap().set_data(&pattern(4095)).unwrap();

    let info = cf.header_info().unwrap();
    assert_eq!(info.mini_fat_sectors, 1);
    // The ministream (root data) holds the whole stream
    assert_eq!(cf.data_by_sid(0).unwrap().len(), 4096);
}

#[test]
fn test_at_cutoff_uses_normal_sectors() {
    let cf = CompoundFile::new();
    cf.root_storage().add_stream("S").unwrap().set_data(&pattern(4096)).unwrap();

    let info = cf.header_info().unwrap();
    assert_eq!(info.mini_fat_sectors, 0);
    assert!(cf.data_by_sid(0).unwrap().is_empty());
}

#[test]
fn test_resize_up_across_cutoff_preserves_bytes() {
    let cf = CompoundFile::new();
    let stream = cf.root_storage().add_stream("S").unwrap();
    stream.set_data(&pattern(4095)).unwrap();
    stream.resize(4096).unwrap();

    let loaded = reload(&cf);
    let data = loaded.root_storage().get_stream("S").unwrap().get_data().unwrap();
    assert_eq!(data.len(), 4096);
    assert_eq!(&data[..4095], &pattern(4095)[..]);
    assert_eq!(data[4095], 0);
}

#[test]
fn test_resize_down_across_cutoff_preserves_bytes() {
    let cf = CompoundFile::new();
    let stream = cf.root_storage().add_stream("S").unwrap();
    stream.set_data(&pattern(4096)).unwrap();
    stream.resize(4095).unwrap();

    let loaded = reload(&cf);
    let data = loaded.root_storage().get_stream("S").unwrap().get_data().unwrap();
    assert_eq!(data, pattern(4095));
    assert_eq!(loaded.header_info().unwrap().mini_fat_sectors, 1);
}

#[test]
fn test_repeated_transitions() {
    let cf = CompoundFile::new();
    let stream = cf.root_storage().add_stream("S").unwrap();
    let full = pattern(20_000);

    stream.set_data(&full[..100]).unwrap();
    for len in [9000usize, 50, 4096, 4095, 20_000, 1] {
        stream.resize(len as u64).unwrap();
        stream.write(&full[..len], 0).unwrap();
        assert_eq!(stream.get_data().unwrap(), &full[..len]);
    }

    let loaded = reload(&cf);
    assert_eq!(loaded.root_storage().get_stream("S").unwrap().get_data().unwrap(), &full[..1]);
}

#[test]
fn test_many_small_streams_share_ministream() {
    let cf = CompoundFile::new();
    let root = cf.root_storage();
    for i in 0..50 {
        root.add_stream(&format!("s{}", i)).unwrap().set_data(&vec![i as u8; 100 + i]).unwrap();
    }

    let loaded = reload(&cf);
    let root = loaded.root_storage();
    for i in 0..50 {
        let data = root.get_stream(&format!("s{}", i)).unwrap().get_data().unwrap();
        assert_eq!(data, vec![i as u8; 100 + i]);
    }
}
