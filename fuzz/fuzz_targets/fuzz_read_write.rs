#![no_main]
use compound_rs::{CompoundFile, Configuration, UpdateMode};
use libfuzzer_sys::{
    arbitrary::{Arbitrary, Unstructured},
    fuzz_target,
};
use std::io::Cursor;

#[derive(Debug, Arbitrary)]
enum StreamOp {
    Write { name_idx: u8, position: u16, data: Vec<u8> },
    Resize { name_idx: u8, length: u16 },
    Delete { name_idx: u8 },
}

// Random operations against an in-memory model, then a save/load check
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let ops: Vec<StreamOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let cf = CompoundFile::new();
    let root = cf.root_storage();
    let mut model: Vec<Option<Vec<u8>>> = vec![None; 8];

    for op in ops.iter().take(64) {
        match op {
            StreamOp::Write { name_idx, position, data } => {
                let idx = (*name_idx % 8) as usize;
                let name = format!("s{}", idx);
                let stream = match root.try_get_stream(&name).unwrap() {
                    Some(stream) => stream,
                    None => root.add_stream(&name).unwrap(),
                };
                stream.write(data, *position as u64).unwrap();
                if data.is_empty() {
                    model[idx].get_or_insert_with(Vec::new);
                    continue;
                }

                let content = model[idx].get_or_insert_with(Vec::new);
                let end = *position as usize + data.len();
                if content.len() < end {
                    content.resize(end, 0);
                }
                content[*position as usize..end].copy_from_slice(data);
            }
            StreamOp::Resize { name_idx, length } => {
                let idx = (*name_idx % 8) as usize;
                if let Some(stream) = root.try_get_stream(&format!("s{}", idx)).unwrap() {
                    stream.resize(*length as u64).unwrap();
                    if let Some(content) = model[idx].as_mut() {
                        content.resize(*length as usize, 0);
                    }
                }
            }
            StreamOp::Delete { name_idx } => {
                let idx = (*name_idx % 8) as usize;
                if model[idx].take().is_some() {
                    root.delete(&format!("s{}", idx)).unwrap();
                }
            }
        }
    }

    let mut image = Cursor::new(Vec::new());
    cf.save(&mut image).unwrap();
    let loaded = CompoundFile::from_stream(
        Cursor::new(image.into_inner()),
        UpdateMode::ReadOnly,
        Configuration::default(),
    )
    .unwrap();

    let root = loaded.root_storage();
    for (idx, expected) in model.iter().enumerate() {
        let found = root.try_get_stream(&format!("s{}", idx)).unwrap();
        match expected {
            Some(content) => assert_eq!(&found.unwrap().get_data().unwrap(), content),
            None => assert!(found.is_none()),
        }
    }
});
