#![no_main]
use gifendec::lzw::{decode_slice, encode_to_vec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u8, Vec<u8>)| {
    let (size, mut data) = input;
    let size = 1 + size % 8;
    let mask = ((1u16 << size) - 1) as u8;
    data.iter_mut().for_each(|b| *b &= mask);
    let encoded = encode_to_vec(&data, size).unwrap();
    assert_eq!(decode_slice(&encoded, size).unwrap(), data);
});
