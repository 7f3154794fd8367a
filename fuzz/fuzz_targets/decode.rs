#![no_main]
use gifendec::{DecodeOptions, GifDocument};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(document) = GifDocument::decode(data, DecodeOptions::new()) else {
        return;
    };
    if document.frames.len() < 16 {
        let _ = document.to_vec();
    }
});
