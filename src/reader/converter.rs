//! Row order and color conversion of decoded frames
use std::iter;
use std::mem;

use super::decoder::PLTE_CHANNELS;

/// Output mode for the image data
pub(crate) const N_CHANNELS: usize = 4;

/// Moves rows from interlaced transmission order to top-to-bottom order.
pub(crate) fn deinterlace(buf: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return buf.to_vec();
    }
    let height = buf.len() / width;
    let mut out = vec![0; buf.len()];
    let rows = InterlaceIterator::new(height);
    for (src, row) in buf.chunks_exact(width).zip(rows) {
        out[row * width..][..width].copy_from_slice(src);
    }
    out
}

/// Moves rows from top-to-bottom order to interlaced transmission order.
pub(crate) fn interlace(buf: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return buf.to_vec();
    }
    let height = buf.len() / width;
    let mut out = Vec::with_capacity(buf.len());
    for row in InterlaceIterator::new(height) {
        out.extend_from_slice(&buf[row * width..][..width]);
    }
    out
}

/// Expands palette indices to RGBA. The transparent index gets alpha 0.
///
/// Indices must be valid for `palette`.
pub(crate) fn indices_to_rgba(indices: &[u8], palette: &[u8], transparent: Option<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * N_CHANNELS);
    for &idx in indices {
        let plte_offset = PLTE_CHANNELS * usize::from(idx);
        match palette.get(plte_offset..plte_offset + PLTE_CHANNELS) {
            Some(colors) if Some(idx) != transparent => {
                out.extend_from_slice(colors);
                out.push(0xFF);
            }
            _ => out.extend_from_slice(&[0; N_CHANNELS]),
        }
    }
    out
}

/// Rows of an interlaced image in transmission order.
pub(crate) struct InterlaceIterator {
    len: usize,
    next: usize,
    pass: usize,
}

impl InterlaceIterator {
    pub(crate) fn new(len: usize) -> Self {
        InterlaceIterator {
            len,
            next: 0,
            pass: 0,
        }
    }
}

impl iter::Iterator for InterlaceIterator {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.len == 0 {
            return None;
        }
        // pass 4 only exists once every row has been returned
        let mut next = self.next + *[8, 8, 4, 2].get(self.pass)?;
        while next >= self.len {
            next = *[4, 2, 1, 0].get(self.pass)?;
            self.pass += 1;
        }
        mem::swap(&mut next, &mut self.next);
        Some(next)
    }
}
