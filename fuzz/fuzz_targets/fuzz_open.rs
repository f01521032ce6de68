#![no_main]
use compound_rs::{CompoundFile, Configuration, UpdateMode};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

// Arbitrary bytes must load or fail cleanly, never panic or hang
fuzz_target!(|data: &[u8]| {
    for lenient in [false, true] {
        let config = Configuration {
            no_validation_exception: lenient,
            ..Configuration::default()
        };
        let cf = match CompoundFile::from_stream(
            Cursor::new(data.to_vec()),
            UpdateMode::ReadOnly,
            config,
        ) {
            Ok(cf) => cf,
            Err(_) => continue,
        };

        let _ = cf.root_storage().visit_entries(
            |item| {
                if let Some(stream) = item.as_stream() {
                    let _ = stream.get_data();
                }
            },
            true,
        );
        let _ = cf.save(&mut Cursor::new(Vec::new()));
    }
});
