//! Variable width bit packing used by the LZW codec.
//!
//! GIF packs codes least significant bit first. The reader pulls bytes from a [`ByteSource`],
//! which for image data strips the sub-block length prefixes, so codes may straddle sub-block
//! boundaries freely.
use std::io::{self, Write};

use crate::reader::DecodingError;

/// Byte-oriented input of a [`BitReader`].
pub trait ByteSource {
    /// Next byte of payload, or `None` once the data is exhausted.
    fn next_byte(&mut self) -> Result<Option<u8>, DecodingError>;

    /// Absolute position of the next byte, used for error reporting.
    fn offset(&self) -> u64;
}

/// Raw, unframed byte slice.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    /// Reads `data` from the start.
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }
}

impl ByteSource for SliceSource<'_> {
    #[inline]
    fn next_byte(&mut self) -> Result<Option<u8>, DecodingError> {
        let byte = self.data.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    #[inline]
    fn next_byte(&mut self) -> Result<Option<u8>, DecodingError> {
        (**self).next_byte()
    }

    fn offset(&self) -> u64 {
        (**self).offset()
    }
}

/// Reads codes of up to 16 bits, least significant bit first.
pub struct BitReader<S> {
    src: S,
    acc: u32,
    nbits: u8,
}

impl<S: ByteSource> BitReader<S> {
    /// Creates a reader with an empty bit buffer.
    pub fn new(src: S) -> Self {
        BitReader { src, acc: 0, nbits: 0 }
    }

    /// Returns the next `n` bits.
    ///
    /// Fails with [`DecodingError::Truncated`] if the source runs dry first.
    pub fn read(&mut self, n: u8) -> Result<u16, DecodingError> {
        debug_assert!((1..=16).contains(&n));
        while self.nbits < n {
            match self.src.next_byte()? {
                Some(byte) => {
                    self.acc |= u32::from(byte) << self.nbits;
                    self.nbits += 8;
                }
                None => {
                    return Err(DecodingError::Truncated {
                        offset: self.src.offset(),
                    })
                }
            }
        }
        let value = (self.acc & ((1 << n) - 1)) as u16;
        self.acc >>= n;
        self.nbits -= n;
        Ok(value)
    }

    /// Position of the underlying source.
    pub fn offset(&self) -> u64 {
        self.src.offset()
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.src
    }

    /// Drops buffered bits and returns the source.
    pub fn into_inner(self) -> S {
        self.src
    }
}

/// Packs codes into bytes, least significant bit first.
pub struct BitWriter<W: Write> {
    w: W,
    acc: u32,
    nbits: u8,
}

impl<W: Write> BitWriter<W> {
    /// Creates a writer with an empty bit buffer.
    pub fn new(w: W) -> Self {
        BitWriter { w, acc: 0, nbits: 0 }
    }

    /// Appends the low `n` bits of `value`.
    pub fn write(&mut self, value: u16, n: u8) -> io::Result<()> {
        debug_assert!((1..=16).contains(&n));
        let value = u32::from(value) & ((1 << n) - 1);
        self.acc |= value << self.nbits;
        self.nbits += n;
        while self.nbits >= 8 {
            self.w.write_all(&[self.acc as u8])?;
            self.acc >>= 8;
            self.nbits -= 8;
        }
        Ok(())
    }

    /// Pads the last partial byte with zero bits and writes it out.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.nbits > 0 {
            self.w.write_all(&[self.acc as u8])?;
            self.acc = 0;
            self.nbits = 0;
        }
        Ok(())
    }

    /// Returns the writer. Call [`BitWriter::flush`] first or pending bits are lost.
    pub fn into_inner(self) -> W {
        self.w
    }
}
