//! Layout fuzz target: compile arbitrary text as a layout and, when it links, decode
//! the bytes after the first NUL with it. Neither step may panic.
//! Build with: cargo fuzz run layout_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let split = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let Ok(layout) = std::str::from_utf8(&data[..split]) else {
        return;
    };
    let Ok(schema) = recfmt::compile(layout) else {
        return;
    };
    let payload = data.get(split + 1..).unwrap_or_default().to_vec();
    let Ok(mut reader) = recfmt::open_formatter(std::sync::Arc::new(schema), &recfmt::RuntimeDefaults::default()) else {
        return;
    };
    reader.set_input(Box::new(std::io::Cursor::new(payload)));
    if reader.initialize().is_err() {
        return;
    }
    for _ in 0..64 {
        match reader.read_record() {
            Ok(Some(_)) | Err(recfmt::FormatError::InvalidData(_)) => {}
            _ => break,
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run layout_fuzz");
}
