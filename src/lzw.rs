//! LZW compression as used by GIF image data.
//!
//! Codes start at `min_code_size + 1` bits and grow up to 12 bits. The width increases before
//! the first code that could reference entry `1 << width`. The decoder defines each entry one
//! code later than the encoder, so it grows the width as soon as its next free code reaches
//! `1 << width`. Once the table holds 4096 entries the decoder keeps
//! reading 12 bit codes without adding entries until a Clear code arrives; the encoder emits
//! a Clear code instead of growing the table further. Literal codes above 255 are corrupt
//! even when the code size allows them.
use std::collections::HashMap;
use std::io::{self, Write};

use crate::bits::{BitReader, BitWriter, ByteSource, SliceSource};
use crate::reader::DecodingError;

/// Largest code width allowed in GIF.
pub const MAX_CODE_SIZE: u8 = 12;

const MAX_ENTRIES: usize = 1 << MAX_CODE_SIZE;

/// Minimum code size for a color table with `colors` entries.
///
/// GIF requires at least 2 even for two-color images.
pub fn min_code_size_for(colors: usize) -> u8 {
    let bits = colors.max(2).next_power_of_two().trailing_zeros() as u8;
    bits.clamp(2, 8)
}

/// Outcome of [`LzwDecoder::decode`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LzwStatus {
    /// The End-of-Information code was read.
    Done,
    /// The output holds `limit` bytes; the stream was not read any further.
    LimitReached,
}

#[derive(Debug, Copy, Clone, Default)]
struct Entry {
    prefix: u16,
    byte: u8,
    first: u8,
    len: u16,
}

/// Decoder state for one image. Reset at every Clear code.
pub struct LzwDecoder {
    min_code_size: u8,
    table: Vec<Entry>,
    next_code: u16,
    width: u8,
    prev: Option<u16>,
}

impl LzwDecoder {
    /// Checks a minimum code size read from an image block.
    pub fn check_code_size(min_code_size: u8) -> bool {
        (1..=11).contains(&min_code_size)
    }

    /// Creates a decoder, or `None` if the code size is not usable.
    pub fn new(min_code_size: u8) -> Option<Self> {
        if !Self::check_code_size(min_code_size) {
            return None;
        }
        let mut table = vec![Entry::default(); MAX_ENTRIES];
        for (i, entry) in table.iter_mut().take(1 << min_code_size).enumerate() {
            *entry = Entry {
                prefix: 0,
                byte: i as u8,
                first: i as u8,
                len: 1,
            };
        }
        let mut decoder = LzwDecoder {
            min_code_size,
            table,
            next_code: 0,
            width: 0,
            prev: None,
        };
        decoder.reset();
        Some(decoder)
    }

    #[inline]
    fn clear_code(&self) -> u16 {
        1 << self.min_code_size
    }

    #[inline]
    fn end_code(&self) -> u16 {
        self.clear_code() + 1
    }

    fn reset(&mut self) {
        self.width = self.min_code_size + 1;
        self.next_code = self.end_code() + 1;
        self.prev = None;
    }

    fn grow_width(&mut self) {
        if self.next_code >= 1 << self.width && self.width < MAX_CODE_SIZE {
            self.width += 1;
        }
    }

    /// Current code width in bits.
    pub fn code_width(&self) -> u8 {
        self.width
    }

    /// Decodes codes into `out` until End-of-Information or until `out` holds `limit` bytes.
    pub fn decode<S: ByteSource>(
        &mut self,
        bits: &mut BitReader<S>,
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<LzwStatus, DecodingError> {
        let clear = self.clear_code();
        let end = self.end_code();
        loop {
            if out.len() >= limit {
                out.truncate(limit);
                return Ok(LzwStatus::LimitReached);
            }
            let code = bits.read(self.width)?;
            if code == clear {
                self.reset();
                continue;
            }
            if code == end {
                return Ok(LzwStatus::Done);
            }
            // literals of wide code sizes must still be byte values
            if code < clear && code > 0xFF {
                return Err(DecodingError::LzwCorruption {
                    offset: bits.offset(),
                    code,
                });
            }
            let prev = match self.prev {
                Some(prev) => prev,
                None => {
                    if code > clear {
                        return Err(DecodingError::LzwCorruption {
                            offset: bits.offset(),
                            code,
                        });
                    }
                    out.push(code as u8);
                    self.prev = Some(code);
                    // The encoder has already defined its first entry. With 1 bit literals
                    // that entry is `1 << width` and the next code is one bit wider.
                    self.grow_width();
                    continue;
                }
            };
            let first = if code < self.next_code {
                self.emit(code, out)
            } else if code == self.next_code {
                // The code being defined right now: previous string plus its own first byte.
                let first = self.emit(prev, out);
                out.push(first);
                first
            } else {
                return Err(DecodingError::LzwCorruption {
                    offset: bits.offset(),
                    code,
                });
            };
            if usize::from(self.next_code) < MAX_ENTRIES {
                let base = self.table[usize::from(prev)];
                self.table[usize::from(self.next_code)] = Entry {
                    prefix: prev,
                    byte: first,
                    first: base.first,
                    len: base.len + 1,
                };
                self.next_code += 1;
                self.grow_width();
            }
            self.prev = Some(code);
        }
    }

    /// Reads past trailing Clear codes and reports whether End-of-Information follows.
    pub fn at_end_code<S: ByteSource>(
        &mut self,
        bits: &mut BitReader<S>,
    ) -> Result<bool, DecodingError> {
        loop {
            let code = bits.read(self.width)?;
            if code == self.clear_code() {
                self.reset();
                continue;
            }
            return Ok(code == self.end_code());
        }
    }

    /// Appends the string of `code` and returns its first byte.
    fn emit(&self, code: u16, out: &mut Vec<u8>) -> u8 {
        let entry = self.table[usize::from(code)];
        let start = out.len();
        out.resize(start + usize::from(entry.len), 0);
        let mut c = code;
        for slot in out[start..].iter_mut().rev() {
            let e = self.table[usize::from(c)];
            *slot = e.byte;
            c = e.prefix;
        }
        entry.first
    }
}

/// Encoder building its table by longest-prefix matching.
pub struct LzwEncoder {
    min_code_size: u8,
    dict: HashMap<u32, u16>,
}

impl LzwEncoder {
    /// Creates an encoder, or `None` if the code size is not usable.
    pub fn new(min_code_size: u8) -> Option<Self> {
        if !LzwDecoder::check_code_size(min_code_size) || min_code_size > 8 {
            return None;
        }
        Some(LzwEncoder {
            min_code_size,
            dict: HashMap::with_capacity(MAX_ENTRIES),
        })
    }

    /// Compresses `data`, framed by a leading Clear and a trailing End-of-Information code,
    /// and flushes the bit writer.
    ///
    /// Every byte must be below `1 << min_code_size`.
    pub fn encode<W: Write>(&mut self, data: &[u8], bits: &mut BitWriter<W>) -> io::Result<()> {
        let clear = 1u16 << self.min_code_size;
        let end = clear + 1;
        if let Some(&symbol) = data.iter().find(|&&b| u16::from(b) >= clear) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "symbol {} does not fit {} bit codes",
                    symbol, self.min_code_size
                ),
            ));
        }

        self.dict.clear();
        let mut width = self.min_code_size + 1;
        let mut next = end + 1;
        bits.write(clear, width)?;

        let mut iter = data.iter();
        let mut prefix = match iter.next() {
            Some(&b) => u16::from(b),
            None => {
                bits.write(end, width)?;
                return bits.flush();
            }
        };
        for &b in iter {
            let key = (u32::from(prefix) << 8) | u32::from(b);
            if let Some(&code) = self.dict.get(&key) {
                prefix = code;
                continue;
            }
            bits.write(prefix, width)?;
            if usize::from(next) < MAX_ENTRIES {
                if next >= 1 << width && width < MAX_CODE_SIZE {
                    width += 1;
                }
                self.dict.insert(key, next);
                next += 1;
            } else {
                bits.write(clear, width)?;
                self.dict.clear();
                width = self.min_code_size + 1;
                next = end + 1;
            }
            prefix = u16::from(b);
        }
        bits.write(prefix, width)?;
        // The decoder defines one more entry on reading the last code.
        if next >= 1 << width && width < MAX_CODE_SIZE {
            width += 1;
        }
        bits.write(end, width)?;
        bits.flush()
    }
}

/// Compresses `data` into a raw, unframed code stream.
pub fn encode_to_vec(data: &[u8], min_code_size: u8) -> io::Result<Vec<u8>> {
    let mut encoder = LzwEncoder::new(min_code_size)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut bits = BitWriter::new(&mut out);
    encoder.encode(data, &mut bits)?;
    Ok(out)
}

/// Decompresses a raw, unframed code stream up to its End-of-Information code.
pub fn decode_slice(data: &[u8], min_code_size: u8) -> Result<Vec<u8>, DecodingError> {
    let mut decoder = LzwDecoder::new(min_code_size).ok_or(DecodingError::InvalidMinCodeSize {
        offset: 0,
        size: min_code_size,
    })?;
    let mut bits = BitReader::new(SliceSource::new(data));
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.decode(&mut bits, &mut out, usize::MAX)?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_code_sizes() {
        for &(colors, expected) in &[
            (0, 2),
            (1, 2),
            (2, 2),
            (4, 2),
            (5, 3),
            (16, 4),
            (17, 5),
            (128, 7),
            (129, 8),
            (256, 8),
        ] {
            assert_eq!(min_code_size_for(colors), expected, "{colors} colors");
        }
    }

    #[test]
    fn empty_stream_is_clear_then_end() {
        let data = encode_to_vec(&[], 2).unwrap();
        // 3 bit codes: clear (4) then end (5)
        assert_eq!(data, [0b0010_1100]);
        assert!(decode_slice(&data, 2).unwrap().is_empty());
    }

    #[test]
    fn known_stream() {
        // The classic 10x10 sample from the GIF89a walkthrough.
        let pixels: Vec<u8> = [
            1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2,
            2, 2, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 2, 2, 0, 0, 0,
            0, 1, 1, 1, 2, 2, 2, 0, 0, 0, 0, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2, 2,
            2, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1,
        ]
        .to_vec();
        let expected = [
            0x8C, 0x2D, 0x99, 0x87, 0x2A, 0x1C, 0xDC, 0x33, 0xA0, 0x02, 0x75, 0xEC, 0x95, 0xFA,
            0xA8, 0xDE, 0x60, 0x8C, 0x04, 0x91, 0x4C, 0x01,
        ];
        assert_eq!(encode_to_vec(&pixels, 2).unwrap(), expected);
        assert_eq!(decode_slice(&expected, 2).unwrap(), pixels);
    }

    #[test]
    fn table_overflow_clears() {
        // Enough distinct pairs to fill the 4096 entry table several times over.
        let data: Vec<u8> = (0..40_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        let packed = encode_to_vec(&data, 8).unwrap();
        assert_eq!(decode_slice(&packed, 8).unwrap(), data);
    }

    #[test]
    fn width_grows_after_boundary() {
        let mut decoder = LzwDecoder::new(2).unwrap();
        assert_eq!(decoder.code_width(), 3);
        // 0, 1, 2 add entries 6 and 7; the entry for code 8 needs 4 bits.
        let mut out = Vec::new();
        let mut packed = Vec::new();
        {
            let mut w = BitWriter::new(&mut packed);
            for code in [4u16, 0, 1, 2] {
                w.write(code, 3).unwrap();
            }
            w.write(5, 4).unwrap();
            w.flush().unwrap();
        }
        let mut bits = BitReader::new(SliceSource::new(&packed));
        assert_eq!(
            decoder.decode(&mut bits, &mut out, usize::MAX).unwrap(),
            LzwStatus::Done
        );
        assert_eq!(out, [0, 1, 2]);
        assert_eq!(decoder.code_width(), 4);
    }

    #[test]
    fn undefined_code_is_corruption() {
        let mut packed = Vec::new();
        {
            let mut w = BitWriter::new(&mut packed);
            w.write(4, 3).unwrap();
            w.write(1, 3).unwrap();
            // next free code is 6, 7 is not defined yet
            w.write(7, 3).unwrap();
            w.flush().unwrap();
        }
        match decode_slice(&packed, 2) {
            Err(DecodingError::LzwCorruption { code: 7, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn limit_stops_early() {
        let data = vec![3u8; 1000];
        let packed = encode_to_vec(&data, 2).unwrap();
        let mut decoder = LzwDecoder::new(2).unwrap();
        let mut bits = BitReader::new(SliceSource::new(&packed));
        let mut out = Vec::new();
        let status = decoder.decode(&mut bits, &mut out, 10).unwrap();
        assert_eq!(status, LzwStatus::LimitReached);
        assert_eq!(out, [3; 10]);
    }

    #[test]
    fn one_bit_literals() {
        let data: Vec<u8> = (0..64).map(|i| (i / 3 % 2) as u8).collect();
        let packed = encode_to_vec(&data, 1).unwrap();
        assert_eq!(decode_slice(&packed, 1).unwrap(), data);
        // the first entry after a Clear is already 4 == 1 << 2
        let mut packed = Vec::new();
        {
            let mut w = BitWriter::new(&mut packed);
            w.write(2, 2).unwrap();
            w.write(1, 2).unwrap();
            w.write(4, 3).unwrap();
            w.write(3, 3).unwrap();
            w.flush().unwrap();
        }
        assert_eq!(decode_slice(&packed, 1).unwrap(), [1, 1, 1]);
        assert_eq!(encode_to_vec(&[1, 1, 1], 1).unwrap(), packed);
    }

    #[test]
    fn wide_literals_must_be_bytes() {
        let mut packed = Vec::new();
        {
            let mut w = BitWriter::new(&mut packed);
            for code in [512u16, 300, 513] {
                w.write(code, 10).unwrap();
            }
            w.flush().unwrap();
        }
        match decode_slice(&packed, 9) {
            Err(DecodingError::LzwCorruption { code: 300, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        // byte sized literals are fine at any width
        let mut packed = Vec::new();
        {
            let mut w = BitWriter::new(&mut packed);
            for code in [512u16, 200, 255, 513] {
                w.write(code, 10).unwrap();
            }
            w.flush().unwrap();
        }
        assert_eq!(decode_slice(&packed, 9).unwrap(), [200, 255]);
    }

    #[test]
    fn rejects_symbols_outside_alphabet() {
        assert!(encode_to_vec(&[0, 1, 4], 2).is_err());
        assert!(LzwEncoder::new(9).is_none());
        assert!(LzwDecoder::new(0).is_none());
        assert!(LzwDecoder::new(12).is_none());
    }
}
